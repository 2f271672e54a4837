//! Error types for the daemon, client, and listener.

use std::path::PathBuf;

use thiserror::Error;

use hearth_wire::WireError;

/// Error surface for the execute protocol and daemon lifecycle.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Framing or descriptor-transfer failure on the channel.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The control socket could not be dialed (no listener, refused,
    /// or permission denied).
    #[error("cannot connect to daemon at {socket}: {source}")]
    Connect {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The socket path is held by a live, responsive peer.
    #[error("a daemon is already listening at {socket}")]
    AlreadyRunning { socket: PathBuf },

    /// The client opened the exchange with a verb this server does not know.
    #[error("unsupported request verb {verb:?}")]
    UnsupportedRequest { verb: String },

    /// Exit codes on the wire are confined to 0..=254; 255 is reserved for
    /// abnormal handler close.
    #[error("exit code {code} outside the valid range 0..=254")]
    InvalidExitCode { code: i32 },

    /// Handshake violation: missing or malformed frame where the protocol
    /// requires a specific one.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// System call failure (fork, pipe, dup2, …).
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),

    /// Runtime-info file serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
