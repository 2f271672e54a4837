//! End-to-end tests for the preloading daemon behind `hearth exec`.
//!
//! Each test gets its own `HOME` so daemons never collide; the guard kills
//! the detached daemon via the pid recorded in `daemon.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread::sleep;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;

const APP_DIR: &str = ".hearth";

fn hearth_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hearth"))
}

fn exec_from(home: &Path, cwd: &Path, args: &[&str]) -> Output {
    Command::new(hearth_bin())
        .env("HOME", home)
        .current_dir(cwd)
        .arg("exec")
        .args(args)
        .output()
        .expect("run hearth exec")
}

struct DaemonGuard {
    home: PathBuf,
}

impl DaemonGuard {
    fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    fn app_dir(&self) -> PathBuf {
        self.home.join(APP_DIR)
    }

    fn pid(&self) -> Option<i32> {
        let raw = fs::read(self.app_dir().join("daemon.json")).ok()?;
        let value: serde_json::Value = serde_json::from_slice(&raw).ok()?;
        value.get("pid")?.as_i64().map(|pid| pid as i32)
    }

    fn kill(&self) {
        if let Some(pid) = self.pid() {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[test]
fn exec_spawns_the_daemon_then_rides_the_fast_path() {
    let home = TempDir::new().expect("home");
    let guard = DaemonGuard::new(home.path());

    let first = exec_from(home.path(), home.path(), &["hello", "world"]);
    assert_eq!(
        first.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&first.stderr),
    );
    assert_eq!(String::from_utf8_lossy(&first.stdout), "exec hello world\n");

    // The daemon left its full footprint behind.
    assert!(guard.app_dir().join("control.sock").exists());
    assert!(guard.app_dir().join("log").exists());
    let first_pid = guard.pid().expect("daemon pid recorded");

    // Second invocation takes the fast path into the same daemon.
    let second = exec_from(home.path(), home.path(), &["again"]);
    assert_eq!(second.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&second.stdout), "exec again\n");
    assert_eq!(guard.pid(), Some(first_pid), "no second daemon may spawn");
}

#[test]
fn nonzero_application_status_reaches_the_launcher() {
    let home = TempDir::new().expect("home");
    let _guard = DaemonGuard::new(home.path());

    let output = exec_from(home.path(), home.path(), &["--status", "76", "boom"]);
    assert_eq!(output.status.code(), Some(76));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "exec boom\n");
}

#[test]
fn runner_panic_reports_one_and_lands_in_the_log() {
    let home = TempDir::new().expect("home");
    let guard = DaemonGuard::new(home.path());

    let output = exec_from(home.path(), home.path(), &["--panic"]);
    assert_eq!(output.status.code(), Some(1));

    let log = fs::read_to_string(guard.app_dir().join("log")).expect("read daemon log");
    assert!(
        log.contains("application runner panicked"),
        "log should record the panic: {log}",
    );
}

#[test]
fn concurrent_launchers_share_one_daemon_and_their_own_cwd() {
    let home = TempDir::new().expect("home");
    let guard = DaemonGuard::new(home.path());

    let dir_a = TempDir::new().expect("dir a");
    let dir_b = TempDir::new().expect("dir b");
    let expect_a = fs::canonicalize(dir_a.path()).expect("canonicalize a");
    let expect_b = fs::canonicalize(dir_b.path()).expect("canonicalize b");

    // Launch both before waiting on either: whichever loses the bind race
    // must still ride the winner's daemon.
    let spawn = |cwd: &Path| {
        Command::new(hearth_bin())
            .env("HOME", home.path())
            .current_dir(cwd)
            .args(["exec", "--where"])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .expect("spawn hearth exec")
    };
    let child_a = spawn(dir_a.path());
    let child_b = spawn(dir_b.path());

    let out_a = child_a.wait_with_output().expect("wait a");
    let out_b = child_b.wait_with_output().expect("wait b");

    assert_eq!(
        out_a.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&out_a.stderr),
    );
    assert_eq!(
        out_b.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&out_b.stderr),
    );

    // Each worker entered its own caller's directory.
    assert_eq!(
        String::from_utf8_lossy(&out_a.stdout),
        format!("{}\n", expect_a.display()),
    );
    assert_eq!(
        String::from_utf8_lossy(&out_b.stdout),
        format!("{}\n", expect_b.display()),
    );

    assert!(guard.pid().is_some(), "exactly one daemon holds the socket");
}

#[test]
fn stale_socket_is_reclaimed_after_a_daemon_dies() {
    let home = TempDir::new().expect("home");
    let guard = DaemonGuard::new(home.path());

    let first = exec_from(home.path(), home.path(), &["warm"]);
    assert_eq!(first.status.code(), Some(0));
    let old_pid = guard.pid().expect("daemon pid recorded");

    // SIGKILL leaves the socket file behind with nothing listening.
    guard.kill();
    sleep(Duration::from_millis(100));
    let socket = guard.app_dir().join("control.sock");
    assert!(socket.exists(), "killed daemon leaves a stale socket file");

    let second = exec_from(home.path(), home.path(), &["revived"]);
    assert_eq!(
        second.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&second.stderr),
    );
    assert_eq!(String::from_utf8_lossy(&second.stdout), "exec revived\n");
    assert!(socket.exists(), "fresh daemon rebinds the socket path");

    let new_pid = guard.pid().expect("new daemon pid recorded");
    assert_ne!(new_pid, old_pid, "a fresh daemon must have taken over");
}
