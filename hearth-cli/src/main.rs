//! hearth — preloading command-execution launcher.
//!
//! # Usage
//!
//! ```text
//! hearth server <socket_path>    run the example echo server in the foreground
//! hearth client <socket_path>    execute using this process's cwd/argv/stdio
//! hearth exec [args…]            discover or spawn the preloading daemon, then execute
//! ```

mod commands;
mod demo;

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

use commands::{client::ClientArgs, exec::ExecArgs, server::ServerArgs};

/// Exit code for launcher usage errors.
const USAGE_ERROR: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "hearth",
    version,
    about = "Run commands through a preloading daemon",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the example echo server in the foreground (threaded dispatch).
    Server(ServerArgs),

    /// Execute against a server socket with this process's cwd/argv/stdio.
    Client(ClientArgs),

    /// Execute through the preloading daemon, spawning it if needed.
    Exec(ExecArgs),
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(USAGE_ERROR),
            };
        }
    };

    let outcome = match cli.command {
        Commands::Server(args) => commands::server::run(args),
        Commands::Client(args) => commands::client::run(args),
        Commands::Exec(args) => commands::exec::run(args),
    };

    match outcome {
        Ok(code) => ExitCode::from(code.clamp(0, 254) as u8),
        Err(err) => {
            eprintln!("hearth: {err:#}");
            ExitCode::FAILURE
        }
    }
}
