//! `hearth exec` — execute through the preloading daemon, spawning it on
//! first use.

use anyhow::{Context, Result};
use clap::Args;

use hearth_daemon::Daemon;

use crate::demo;

/// Directory name under the home directory holding the demo daemon's
/// socket, log, and runtime file.
pub const APP_NAME: &str = ".hearth";

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Arguments for the hosted application (the demo echoes them back).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub fn run(_args: ExecArgs) -> Result<i32> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let daemon = Daemon::new(home, APP_NAME, demo::warmup, demo::echo_runner);
    daemon.run().context("execute via preloading daemon failed")
}
