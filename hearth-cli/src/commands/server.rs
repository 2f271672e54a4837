//! `hearth server` — run the example echo server in the foreground.

use std::fs::File;
use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Args;

use hearth_daemon::{Handler, Listener};

use crate::demo;

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Path for the listening socket.
    pub socket: PathBuf,
}

pub fn run(args: ServerArgs) -> Result<i32> {
    init_tracing();

    let listener = Listener::bind(&args.socket)
        .with_context(|| format!("failed to bind {}", args.socket.display()))?;
    tracing::info!(socket = %args.socket.display(), "echo server accepting connections");

    loop {
        match listener.accept() {
            Ok(handler) => {
                // Threaded dispatch is fine for the demo: the handler writes
                // to the received descriptors directly and never touches
                // process-global state. A real application must fork — see
                // the supervisor.
                thread::spawn(move || {
                    if let Err(err) = serve_one(handler) {
                        tracing::warn!(error = %err, "request failed");
                    }
                });
            }
            Err(err) => tracing::error!(error = %err, "accept failed"),
        }
    }
}

fn serve_one(mut handler: Handler) -> Result<()> {
    let request = handler.receive()?;
    tracing::info!(cwd = %request.cwd.display(), argv = ?request.argv, "execute request");

    // Duplicate the received stdout so the handler's own copy stays
    // untouched until close.
    let stdout = unsafe { BorrowedFd::borrow_raw(request.stdout) };
    let mut out = File::from(stdout.try_clone_to_owned().context("dup client stdout")?);

    let code = demo::respond(&request, &mut out)?;
    handler.close_with_exit_code(code)?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
