use std::path::{Path, PathBuf};

pub const CONTROL_SOCKET: &str = "control.sock";
pub const LOG_FILE: &str = "log";
pub const RUNTIME_FILE: &str = "daemon.json";

/// Per-application directory under the caller-supplied root
/// (typically the user's home directory).
pub fn app_dir(root: &Path, app: &str) -> PathBuf {
    root.join(app)
}

pub fn socket_path(root: &Path, app: &str) -> PathBuf {
    app_dir(root, app).join(CONTROL_SOCKET)
}

pub fn log_path(root: &Path, app: &str) -> PathBuf {
    app_dir(root, app).join(LOG_FILE)
}

pub fn runtime_file_path(root: &Path, app: &str) -> PathBuf {
    app_dir(root, app).join(RUNTIME_FILE)
}
