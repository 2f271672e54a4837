//! The illustrative echo application hosted by the demo commands.
//!
//! A real embedder supplies its own loader and runner; this one echoes the
//! invocation back so the plumbing is observable end to end. Three argument
//! escapes exercise the less cheerful paths:
//!
//! - `--status <N>` — report `N` as the exit code
//! - `--where` — print the working directory instead of the arguments
//! - `--panic` — crash the runner

use std::io::{self, Write};

use hearth_daemon::{DaemonError, ExecuteRequest};

/// One-shot warmup. A real application pays its cold start here.
pub fn warmup() -> Result<(), DaemonError> {
    tracing::info!("demo application warmed up");
    Ok(())
}

/// Respond to one request by writing to `out`.
///
/// `--where` reports `std::env::current_dir()`, not the request record: in
/// the forking daemon the worker has already entered the client's cwd, so
/// this observes the isolation actually in effect.
pub fn respond(request: &ExecuteRequest, out: &mut dyn Write) -> io::Result<i32> {
    let mut args: Vec<&str> = request.argv.iter().skip(1).map(String::as_str).collect();

    if args.iter().any(|arg| *arg == "--panic") {
        panic!("demo panic requested");
    }

    let mut status = 0i32;
    if let Some(pos) = args.iter().position(|arg| *arg == "--status") {
        if let Some(code) = args.get(pos + 1).and_then(|raw| raw.parse().ok()) {
            status = code;
            args.drain(pos..=pos + 1);
        }
    }

    if let Some(pos) = args.iter().position(|arg| *arg == "--where") {
        args.remove(pos);
        let cwd = std::env::current_dir()?;
        writeln!(out, "{}", cwd.display())?;
    } else {
        writeln!(out, "{}", args.join(" "))?;
    }
    out.flush()?;
    Ok(status)
}

/// Runner for the forking daemon: the worker has already installed the
/// client's streams on fds 0–2, so plain stdout reaches the caller.
pub fn echo_runner(request: &ExecuteRequest) -> i32 {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match respond(request, &mut out) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "echo responder failed");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(argv: &[&str]) -> ExecuteRequest {
        ExecuteRequest {
            cwd: PathBuf::from("/"),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            stdin: -1,
            stdout: -1,
            stderr: -1,
        }
    }

    #[test]
    fn echoes_everything_after_argv_zero() {
        let mut out = Vec::new();
        let code = respond(&request(&["hearth", "client", "hi"]), &mut out).expect("respond");
        assert_eq!(code, 0);
        assert_eq!(out, b"client hi\n");
    }

    #[test]
    fn status_escape_sets_the_code_and_is_consumed() {
        let mut out = Vec::new();
        let code =
            respond(&request(&["hearth", "exec", "--status", "76", "boom"]), &mut out)
                .expect("respond");
        assert_eq!(code, 76);
        assert_eq!(out, b"exec boom\n");
    }

    #[test]
    fn where_escape_reports_the_working_directory() {
        let mut out = Vec::new();
        let code = respond(&request(&["hearth", "exec", "--where"]), &mut out).expect("respond");
        assert_eq!(code, 0);
        let expected = format!("{}\n", std::env::current_dir().expect("cwd").display());
        assert_eq!(String::from_utf8(out).expect("utf8"), expected);
    }
}
