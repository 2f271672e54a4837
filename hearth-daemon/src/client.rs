//! Client side of one execute exchange.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;

use hearth_wire::{fdpass, FrameChannel};

use crate::error::{io_err, DaemonError};
use crate::protocol::{self, EXECUTE_VERB, SENTINELS};

/// A connected execute client.
///
/// One client serves one exchange: dial, hand over cwd/argv/streams, block
/// for the exit code.
pub struct Client {
    channel: FrameChannel<UnixStream>,
}

impl Client {
    /// Dial the daemon's control socket.
    pub fn connect(socket: &Path) -> Result<Self, DaemonError> {
        let stream = UnixStream::connect(socket).map_err(|source| DaemonError::Connect {
            socket: socket.to_path_buf(),
            source,
        })?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream (used by tests and the demo server).
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            channel: FrameChannel::new(stream),
        }
    }

    /// Perform the execute handshake and block until the daemon reports an
    /// exit status.
    ///
    /// The reply must be a decimal integer in 0..=254; anything else —
    /// including a missing reply or the reserved 255 — fails with
    /// [`DaemonError::Protocol`].
    pub fn execute(
        &mut self,
        cwd: &Path,
        argv: &[String],
        stdin: BorrowedFd<'_>,
        stdout: BorrowedFd<'_>,
        stderr: BorrowedFd<'_>,
    ) -> Result<i32, DaemonError> {
        self.channel.send(EXECUTE_VERB)?;
        self.channel.send(cwd.as_os_str().as_bytes())?;
        self.channel.send(&protocol::join_argv(argv))?;

        let socket_fd = self.channel.as_raw_fd();
        for (fd, sentinel) in [stdin, stdout, stderr].into_iter().zip(SENTINELS) {
            fdpass::send_fd(socket_fd, fd)?;
            self.channel.send(sentinel)?;
        }

        let reply = self.channel.recv()?.ok_or_else(|| {
            DaemonError::Protocol("daemon closed connection before replying".to_string())
        })?;
        protocol::parse_exit_code(&reply)
    }

    /// Snapshot the calling process — cwd, argv, fds 0/1/2 — dial `socket`,
    /// and return the exit code for the caller to propagate.
    pub fn execute_current(socket: &Path) -> Result<i32, DaemonError> {
        let cwd = std::env::current_dir().map_err(|e| io_err("current dir", e))?;
        let argv: Vec<String> = std::env::args().collect();

        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();

        let mut client = Self::connect(socket)?;
        client.execute(&cwd, &argv, stdin.as_fd(), stdout.as_fd(), stderr.as_fd())
    }
}
