//! Preloading command-execution daemon.
//!
//! A one-time daemon process pays an application's cold-start cost, then
//! serves subsequent invocations over a Unix-domain socket. The thin client
//! ships the invoking terminal's working directory, argument vector, and
//! three standard stream descriptors to the daemon; the daemon runs the
//! application in a forked worker with those streams installed on fds 0–2,
//! and the client blocks until it receives the exit status. Typing the
//! command feels like a normal program invocation — the application code
//! just happens to run warm.

mod error;
pub mod client;
pub mod handler;
pub mod listener;
pub mod paths;
pub mod protocol;
pub mod supervisor;

pub use client::Client;
pub use error::DaemonError;
pub use handler::Handler;
pub use listener::Listener;
pub use protocol::ExecuteRequest;
pub use supervisor::{Daemon, RuntimeInfo};
