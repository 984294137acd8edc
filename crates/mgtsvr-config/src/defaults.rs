use camino::Utf8PathBuf;
use std::env;

use crate::logging::LogFormat;

/// Default TCP port the server listens on.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default TCP bind host.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default worker pool size.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Upper bound on the worker pool size.
pub const MAX_WORKER_THREADS: usize = 32;

/// Default longest inbound line accepted before the peer is disconnected.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024;

/// Default pause between a farewell message and closing the socket.
pub const DEFAULT_DISCONNECT_DELAY_MS: u64 = 250;

/// Default name of the persisted credential database.
pub const DEFAULT_AUTH_DB: &str = "fortune_auth_db.json";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default TCP bind host as an owned value.
pub fn default_tcp_host() -> String {
    DEFAULT_TCP_HOST.to_owned()
}

/// Default credential database path.
pub fn default_auth_db() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_AUTH_DB)
}

/// Socket file name inside the runtime directory.
const SOCKET_FILE_NAME: &str = "fortune.sock";

/// Where the UNIX socket lives when none is configured.
///
/// `$XDG_RUNTIME_DIR/mgtsvr/fortune.sock` when a runtime directory exists.
/// Otherwise the shared temp directory is used, with a per-user `uid-N`
/// component so that two users on one host do not fight over the socket.
pub fn default_unix_socket_path() -> Utf8PathBuf {
    let mut path = runtime_dir()
        .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
        .map_or_else(
            || {
                let mut shared = temp_base();
                shared.push("mgtsvr");
                if let Some(owner) = owner_component() {
                    shared.push(owner);
                }
                shared
            },
            |runtime| runtime.join("mgtsvr"),
        );
    path.push(SOCKET_FILE_NAME);
    path
}

fn temp_base() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn runtime_dir() -> Option<std::path::PathBuf> {
    dirs::runtime_dir()
}

#[cfg(not(unix))]
fn runtime_dir() -> Option<std::path::PathBuf> {
    None
}

#[cfg(unix)]
fn owner_component() -> Option<String> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { libc::geteuid() };
    Some(format!("uid-{uid}"))
}

#[cfg(not(unix))]
fn owner_component() -> Option<String> {
    None
}
