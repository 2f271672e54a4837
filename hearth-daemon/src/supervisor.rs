//! Daemon supervisor: discover-or-spawn, daemonization, per-request workers.
//!
//! The launcher first tries the fast path — dial the control socket and run
//! the execute handshake. If nothing is listening it spawns the daemon via
//! the standard double-fork/setsid sequence, waits for an explicit readiness
//! frame on a pipe (never a poll loop, so the launcher cannot race the
//! bind), and re-enters the fast path.
//!
//! Each accepted connection is serviced in a forked worker. Stdio
//! redirection, the working-directory change, and the argument vector are
//! process-global; a dedicated process per request is the only dispatch
//! that keeps concurrent requests from corrupting each other.

use std::convert::Infallible;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{dup2, fork, pipe, setsid, ForkResult};
use serde::{Deserialize, Serialize};

use hearth_wire::FrameChannel;

use crate::client::Client;
use crate::error::{io_err, DaemonError};
use crate::handler::Handler;
use crate::listener::Listener;
use crate::paths;
use crate::protocol::{ExecuteRequest, EXIT_CODE_MAX};

/// Exit code reported when the runner callback panics.
pub const CODE_APP_FAILURE: i32 = 1;
/// Exit code reported when the request cannot be decoded.
pub const CODE_RECEIVE_FAILURE: i32 = 130;
/// Exit code reported when worker setup (redirection, chdir) fails.
pub const CODE_HANDLER_FAILURE: i32 = 254;

const CONNECT_ATTEMPTS: usize = 50;
const RETRY_DELAY: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
const READY_SENTINEL: &[u8] = b"ready";

/// Maximum log file size before rotation (10 MiB).
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Operator-facing record written next to the control socket once the
/// daemon is accepting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub pid: u32,
    pub socket: String,
    pub started_at_unix: u64,
}

/// The preloading daemon for one application.
///
/// `loader` runs exactly once, inside the daemonized process, before the
/// socket binds — this is where the application pays its cold-start cost.
/// `runner` runs once per request, inside a forked worker whose fds 0–2 and
/// working directory already belong to the requesting client.
pub struct Daemon<L, R> {
    root: PathBuf,
    app: String,
    loader: Option<L>,
    runner: R,
}

impl<L, R> Daemon<L, R>
where
    L: FnOnce() -> Result<(), DaemonError>,
    R: FnMut(&ExecuteRequest) -> i32,
{
    /// `root` is the directory under which `<app>/` lives — typically the
    /// user's home, injected by the caller so tests can relocate it.
    pub fn new(root: impl Into<PathBuf>, app: impl Into<String>, loader: L, runner: R) -> Self {
        Self {
            root: root.into(),
            app: app.into(),
            loader: Some(loader),
            runner,
        }
    }

    /// Execute the current process's invocation through the daemon,
    /// spawning it first if nothing is listening.
    ///
    /// Returns the application's exit code for the caller to propagate.
    /// In the spawned daemon process this function never returns.
    pub fn run(mut self) -> Result<i32, DaemonError> {
        let socket = paths::socket_path(&self.root, &self.app);
        let mut spawned = false;

        for _ in 0..CONNECT_ATTEMPTS {
            match Client::execute_current(&socket) {
                Ok(code) => return Ok(code),
                Err(DaemonError::Connect { source, .. })
                    if matches!(
                        source.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) => {}
                Err(other) => return Err(other),
            }

            if spawned {
                // A daemon is coming up (ours, or a concurrent launcher's
                // that won the bind race); give it a beat and redial.
                sleep(RETRY_DELAY);
            } else {
                self.spawn_daemon(&socket)?;
                spawned = true;
            }
        }

        Err(DaemonError::Connect {
            socket,
            source: io::Error::new(io::ErrorKind::TimedOut, "daemon did not become ready"),
        })
    }

    /// Fork the daemon and block until it signals readiness.
    ///
    /// Returns only in the launcher. The readiness pipe closing without a
    /// frame means the daemon exited early — lost bind race or loader
    /// failure — and the connect loop decides what that means.
    fn spawn_daemon(&mut self, socket: &Path) -> Result<(), DaemonError> {
        let dir = paths::app_dir(&self.root, &self.app);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let (ready_rx, ready_tx) = pipe()?;
        match unsafe { fork() }? {
            ForkResult::Parent { child } => {
                drop(ready_tx);
                // The intermediate child exits as soon as the daemon detaches.
                let _ = waitpid(child, None);

                let mut readiness = FrameChannel::new(File::from(ready_rx));
                match readiness.recv() {
                    Ok(Some(_)) => {}
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(error = %err, "readiness pipe read failed");
                    }
                }
                Ok(())
            }
            ForkResult::Child => {
                drop(ready_rx);
                let err = match self.serve(socket, ready_tx) {
                    Err(err) => err,
                    Ok(never) => match never {},
                };
                // Pre-redirect this reaches the launcher's terminal;
                // afterwards it lands in the log.
                eprintln!("hearth daemon failed to start: {err}");
                process::exit(1);
            }
        }
    }

    /// Daemonize, load the application, bind, signal readiness, accept.
    /// Runs entirely in the forked child; never returns on success.
    fn serve(&mut self, socket: &Path, ready: OwnedFd) -> Result<Infallible, DaemonError> {
        // Detach from the launcher's session, then fork again so the daemon
        // is not a session leader.
        setsid()?;
        match unsafe { fork() }? {
            ForkResult::Parent { .. } => process::exit(0),
            ForkResult::Child => {}
        }
        std::env::set_current_dir("/").map_err(|e| io_err("/", e))?;

        let log_path = paths::log_path(&self.root, &self.app);
        redirect_std_streams(&log_path)?;
        // Workers are reaped by the kernel, not by the accept loop.
        unsafe { signal(Signal::SIGCHLD, SigHandler::SigIgn) }?;

        init_daemon_tracing(&log_path);
        tracing::info!(app = %self.app, pid = process::id(), "daemon starting");

        if let Some(loader) = self.loader.take() {
            if let Err(err) = loader() {
                tracing::error!(error = %err, "application loader failed; daemon exiting");
                return Err(err);
            }
        }
        tracing::info!("application loaded");

        let mut listener = match Listener::bind(socket) {
            Ok(listener) => listener,
            Err(DaemonError::AlreadyRunning { socket }) => {
                // A concurrent launcher's daemon bound first; it serves
                // everyone, including our launcher.
                tracing::info!(socket = %socket.display(), "another daemon bound first; exiting");
                process::exit(0);
            }
            Err(err) => return Err(err),
        };

        if let Err(err) = write_runtime_file(&self.root, &self.app, socket) {
            tracing::warn!(error = %err, "failed to write runtime info file");
        }

        let mut readiness = FrameChannel::new(File::from(ready));
        readiness.send(READY_SENTINEL)?;
        drop(readiness);
        tracing::info!(socket = %listener.path().display(), "accepting connections");

        self.accept_loop(&mut listener, &log_path)
    }

    /// Supervisor of last resort: per-request errors are logged and the
    /// loop keeps accepting.
    fn accept_loop(&mut self, listener: &mut Listener, log_path: &Path) -> ! {
        loop {
            rotate_log(log_path);

            let handler = match listener.accept() {
                Ok(handler) => handler,
                Err(err) => {
                    tracing::error!(error = %err, "accept failed");
                    sleep(ACCEPT_BACKOFF);
                    continue;
                }
            };

            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    // The worker inherited the listening descriptor; close
                    // it without touching the socket file.
                    listener.abandon();
                    let code = service_request(handler, &mut self.runner);
                    process::exit(code);
                }
                Ok(ForkResult::Parent { child }) => {
                    tracing::debug!(worker = %child, "dispatched connection to worker");
                    // Parent's copy of the connection closes silently; the
                    // handler has not decoded anything yet.
                    drop(handler);
                }
                Err(err) => {
                    tracing::error!(error = %err, "fork failed; dropping connection");
                    drop(handler);
                }
            }
        }
    }
}

// ─── Worker ───────────────────────────────────────────────────────────────────

/// Service one request inside a forked worker. Returns the code that was
/// (or should have been) delivered to the client; the worker exits with it.
fn service_request<R>(mut handler: Handler, runner: &mut R) -> i32
where
    R: FnMut(&ExecuteRequest) -> i32,
{
    let request = match handler.receive() {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "failed to decode execute request");
            let _ = handler.close_with_exit_code(CODE_RECEIVE_FAILURE);
            return CODE_RECEIVE_FAILURE;
        }
    };

    // Diagnostics before any process-global state changes hands.
    tracing::info!(
        cwd = %request.cwd.display(),
        argv = ?request.argv,
        "servicing execute request"
    );

    if let Err(err) = install_client_streams(&request) {
        tracing::error!(error = %err, "failed to install client streams on fds 0-2");
        let _ = handler.close_with_exit_code(CODE_HANDLER_FAILURE);
        return CODE_HANDLER_FAILURE;
    }
    if let Err(err) = std::env::set_current_dir(&request.cwd) {
        tracing::error!(cwd = %request.cwd.display(), error = %err, "failed to enter client cwd");
        let _ = handler.close_with_exit_code(CODE_HANDLER_FAILURE);
        return CODE_HANDLER_FAILURE;
    }

    // Fd 2 now belongs to the caller's terminal, and the default panic hook
    // reports there. Route the report into the daemon log instead; the
    // worker exits right after dispatch, so the hook is never restored.
    panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(panic = %info, %backtrace, "application runner panicked");
    }));

    match panic::catch_unwind(AssertUnwindSafe(|| runner(&request))) {
        Ok(code) => {
            let clamped = clamp_exit_code(code);
            if clamped != code {
                tracing::warn!(code, clamped, "application exit code clamped into 0..=254");
            }
            if let Err(err) = handler.close_with_exit_code(clamped) {
                tracing::warn!(error = %err, "failed to deliver exit code");
            }
            clamped
        }
        Err(_) => {
            // The hook already recorded the panic and its backtrace.
            let _ = handler.close_with_exit_code(CODE_APP_FAILURE);
            CODE_APP_FAILURE
        }
    }
}

/// Duplicate the client's descriptors over this process's fds 0/1/2 so any
/// library writing to the standard streams reaches the caller's terminal.
fn install_client_streams(request: &ExecuteRequest) -> Result<(), DaemonError> {
    dup2(request.stdin, 0)?;
    dup2(request.stdout, 1)?;
    dup2(request.stderr, 2)?;
    Ok(())
}

/// Confine an application exit code to what the wire can carry. 255 is
/// reserved for abnormal handler close and never reported as a result.
fn clamp_exit_code(code: i32) -> i32 {
    code.clamp(0, EXIT_CODE_MAX)
}

// ─── Daemon process plumbing ──────────────────────────────────────────────────

/// Point fd 0 at /dev/null and fds 1/2 at the append-only log.
fn redirect_std_streams(log_path: &Path) -> Result<(), DaemonError> {
    let devnull = File::open("/dev/null").map_err(|e| io_err("/dev/null", e))?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| io_err(log_path, e))?;
    dup2(devnull.as_raw_fd(), 0)?;
    dup2(log.as_raw_fd(), 1)?;
    dup2(log.as_raw_fd(), 2)?;
    Ok(())
}

/// Rotate the log when oversized and re-point fds 1/2 at the fresh file.
/// The tracing writer follows the path on its next event.
fn rotate_log(log_path: &Path) {
    match rotate_if_oversized(log_path, MAX_LOG_BYTES) {
        Ok(true) => {
            if let Err(err) = redirect_std_streams(log_path) {
                tracing::warn!(error = %err, "failed to re-open log after rotation");
            } else {
                tracing::info!(path = %log_path.display(), "log file rotated");
            }
        }
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed");
        }
    }
}

/// Move an oversized log aside and start a fresh one.
///
/// One backup generation (`log.old`, overwritten on each rotation) is
/// enough history for a per-user daemon log. A missing log is not an
/// error; the daemon simply has not written yet.
fn rotate_if_oversized(log_path: &Path, max_bytes: u64) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    fs::rename(log_path, backup_log_path(log_path))?;
    // Fresh empty log so writers always have a path.
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    Ok(true)
}

/// Backup generation for `base` (e.g. `log.old`).
fn backup_log_path(base: &Path) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(paths::LOG_FILE);
    base.with_file_name(format!("{name}.old"))
}

fn init_daemon_tracing(log_path: &Path) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let path = log_path.to_path_buf();
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(move || -> Box<dyn io::Write + Send> {
            // One append-mode open per event keeps interleaved worker and
            // daemon lines intact, and rotation needs no descriptor
            // juggling; the path always leads to the live file.
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Box::new(file),
                Err(_) => Box::new(io::sink()),
            }
        })
        .try_init();
}

fn write_runtime_file(root: &Path, app: &str, socket: &Path) -> Result<(), DaemonError> {
    let info = RuntimeInfo {
        pid: process::id(),
        socket: socket.display().to_string(),
        started_at_unix: unix_seconds_now(),
    };
    let payload = serde_json::to_vec_pretty(&info)?;
    let path = paths::runtime_file_path(root, app);
    fs::write(&path, payload).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ─── Tests ────────────────────────────────────────────────────────────────────
