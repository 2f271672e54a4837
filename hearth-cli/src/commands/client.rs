//! `hearth client` — one execute against a server socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hearth_daemon::Client;

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Path of the server socket to dial.
    pub socket: PathBuf,

    /// Extra arguments; the launcher ignores them, but they reach the
    /// application through the argv snapshot.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub passthrough: Vec<String>,
}

pub fn run(args: ClientArgs) -> Result<i32> {
    Client::execute_current(&args.socket)
        .with_context(|| format!("execute via {} failed", args.socket.display()))
}
