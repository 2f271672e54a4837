//! Unix-domain listening socket with stale-file reclaim.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};
use crate::handler::Handler;

/// Owns the listening socket and its file on disk.
///
/// The socket file belongs to the listener for its entire lifetime: it is
/// created at bind and removed by [`Listener::close`] (or drop). Forked
/// workers that inherit the descriptor call [`Listener::abandon`] instead,
/// which closes their copy without touching the file.
#[derive(Debug)]
pub struct Listener {
    inner: Option<UnixListener>,
    path: PathBuf,
    owns_file: bool,
}

impl Listener {
    /// Bind at `path`, probing any pre-existing socket file first.
    ///
    /// A file that accepts a connection belongs to a live daemon —
    /// [`DaemonError::AlreadyRunning`]. A file that refuses is a leftover
    /// from a dead process and is unlinked before binding.
    pub fn bind(path: &Path) -> Result<Self, DaemonError> {
        if path.exists() {
            match UnixStream::connect(path) {
                Ok(_) => {
                    return Err(DaemonError::AlreadyRunning {
                        socket: path.to_path_buf(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        socket = %path.display(),
                        error = %err,
                        "removing stale control socket before bind",
                    );
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(io_err(path, err)),
                    }
                }
            }
        }

        let inner = UnixListener::bind(path).map_err(|e| io_err(path, e))?;
        set_socket_permissions(path)?;

        Ok(Self {
            inner: Some(inner),
            path: path.to_path_buf(),
            owns_file: true,
        })
    }

    /// Block until a connection arrives and wrap it in a [`Handler`].
    pub fn accept(&self) -> Result<Handler, DaemonError> {
        let listener = self
            .inner
            .as_ref()
            .ok_or_else(|| DaemonError::Protocol("accept on a closed listener".to_string()))?;
        let (stream, _) = listener.accept().map_err(|e| io_err(&self.path, e))?;
        Ok(Handler::new(stream))
    }

    /// Path of the socket file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the listening descriptor and remove the socket file. Idempotent.
    pub fn close(&mut self) {
        drop(self.inner.take());
        if self.owns_file {
            self.owns_file = false;
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(
                        socket = %self.path.display(),
                        error = %err,
                        "failed to remove control socket",
                    );
                }
            }
        }
    }

    /// Close this process's copy of the descriptor, leaving the socket file
    /// for the owning daemon.
    pub fn abandon(&mut self) {
        self.owns_file = false;
        drop(self.inner.take());
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
