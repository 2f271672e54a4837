//! Wire protocol v0 — shapes and constants shared by client and server.
//!
//! An execute exchange is nine client→server items followed by one reply:
//!
//! | # | kind      | payload                         |
//! |---|-----------|---------------------------------|
//! | 1 | frame     | `/v0/execute`                   |
//! | 2 | frame     | cwd (absolute path, UTF-8)      |
//! | 3 | frame     | argv joined with NUL            |
//! | 4 | ancillary | stdin descriptor (SCM_RIGHTS)   |
//! | 5 | frame     | sentinel                        |
//! | 6 | ancillary | stdout descriptor               |
//! | 7 | frame     | sentinel                        |
//! | 8 | ancillary | stderr descriptor               |
//! | 9 | frame     | sentinel                        |
//!
//! Reply: one frame, the exit code as a decimal string in 0..=254. The wire
//! value 255 is reserved for "handler closed before the application replied"
//! and is never a legal application code.
//!
//! The sentinel after each descriptor transfer synchronizes the receiver
//! with the preceding ancillary message; its contents are never inspected.

use std::path::PathBuf;

use crate::error::DaemonError;

/// Opening verb of an execute exchange.
pub const EXECUTE_VERB: &[u8] = b"/v0/execute";

/// Separator for the joined argv frame.
pub const ARGV_SEPARATOR: char = '\0';

/// Largest exit code an application may report over the wire.
pub const EXIT_CODE_MAX: i32 = 254;

/// Reply sent when a handler is dropped after decoding a request but before
/// the application produced a code.
pub const ABNORMAL_CLOSE_REPLY: &[u8] = b"255";

/// Sentinels sent after each descriptor transfer. Any short non-empty frame
/// is legal; these name the descriptor that preceded them to make captures
/// readable.
pub const SENTINELS: [&[u8]; 3] = [b"stdin", b"stdout", b"stderr"];

/// One decoded execute request.
///
/// The three descriptors are owned by the [`crate::Handler`] that produced
/// the request and stay open until it closes; the raw values here are views
/// for redirection and dispatch.
#[derive(Debug)]
pub struct ExecuteRequest {
    pub cwd: PathBuf,
    pub argv: Vec<String>,
    pub stdin: std::os::fd::RawFd,
    pub stdout: std::os::fd::RawFd,
    pub stderr: std::os::fd::RawFd,
}

/// Join an argument vector for frame 3.
pub fn join_argv(argv: &[String]) -> Vec<u8> {
    argv.join("\0").into_bytes()
}

/// Split frame 3 back into an argument vector.
///
/// An empty frame yields one empty element — a short argv is legal.
pub fn split_argv(frame: &[u8]) -> Result<Vec<String>, DaemonError> {
    let joined = String::from_utf8(frame.to_vec())
        .map_err(|_| DaemonError::Protocol("argv frame is not valid UTF-8".to_string()))?;
    Ok(joined.split(ARGV_SEPARATOR).map(str::to_string).collect())
}

/// Render an exit code for the reply frame.
pub fn encode_exit_code(code: i32) -> Result<Vec<u8>, DaemonError> {
    if !(0..=EXIT_CODE_MAX).contains(&code) {
        return Err(DaemonError::InvalidExitCode { code });
    }
    Ok(code.to_string().into_bytes())
}

/// Parse a reply frame into an exit code.
///
/// Anything that is not a decimal integer in 0..=254 — including the
/// reserved 255 — is a protocol error on the client side.
pub fn parse_exit_code(frame: &[u8]) -> Result<i32, DaemonError> {
    let text = std::str::from_utf8(frame)
        .map_err(|_| DaemonError::Protocol("exit-code reply is not valid UTF-8".to_string()))?;
    if text.is_empty() {
        return Err(DaemonError::Protocol("exit-code reply is empty".to_string()));
    }
    let code: i32 = text.parse().map_err(|_| {
        DaemonError::Protocol(format!("exit-code reply {text:?} is not a decimal integer"))
    })?;
    if !(0..=EXIT_CODE_MAX).contains(&code) {
        return Err(DaemonError::Protocol(format!(
            "exit code {code} outside the range 0..=254"
        )));
    }
    Ok(code)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
