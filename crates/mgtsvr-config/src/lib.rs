//! Shared configuration for the management server and its tooling.
//!
//! Values are layered by [`ortho_config`]: built-in defaults, then an optional
//! TOML file, then `MGTSVR_*` environment variables, then command-line flags.
//! [`Config::validate`] runs before any socket is bound so that a bad worker
//! count or a server with no transport fails fast.

mod defaults;
mod logging;
mod policy;
mod socket;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_AUTH_DB, DEFAULT_DISCONNECT_DELAY_MS, DEFAULT_LOG_FILTER, DEFAULT_MAX_LINE_LENGTH,
    DEFAULT_TCP_HOST, DEFAULT_TCP_PORT, DEFAULT_WORKER_THREADS, MAX_WORKER_THREADS,
    default_auth_db, default_log_filter, default_log_format, default_tcp_host,
    default_unix_socket_path,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use policy::{AuthPolicy, AuthPolicyError};
pub use socket::{SocketEndpoint, SocketPreparationError};

fn enabled() -> bool {
    true
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_auth_policy() -> u8 {
    AuthPolicy::ChallengeResponse.level()
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

fn default_disconnect_delay_ms() -> u64 {
    DEFAULT_DISCONNECT_DELAY_MS
}

/// Resolved server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "MGTSVR")]
pub struct Config {
    /// Accept connections over TCP.
    #[serde(default = "enabled")]
    #[ortho_config(default = true)]
    pub tcp_enabled: bool,
    /// Host the TCP listener binds to.
    #[serde(default = "default_tcp_host")]
    #[ortho_config(default = default_tcp_host())]
    pub tcp_host: String,
    /// Port the TCP listener binds to. Zero asks the OS for a free port.
    #[serde(default = "default_tcp_port")]
    #[ortho_config(default = DEFAULT_TCP_PORT)]
    pub tcp_port: u16,
    /// Accept connections over a Unix domain socket.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub unix_enabled: bool,
    /// Filesystem path of the Unix domain socket.
    #[serde(default = "default_unix_socket_path")]
    #[ortho_config(default = default_unix_socket_path())]
    pub unix_socket_path: Utf8PathBuf,
    /// Login policy level, see [`AuthPolicy`].
    #[serde(default = "default_auth_policy")]
    #[ortho_config(default = 3)]
    pub auth_policy: u8,
    /// Number of command worker threads (1 to 32).
    #[serde(default = "default_worker_threads")]
    #[ortho_config(default = DEFAULT_WORKER_THREADS)]
    pub worker_threads: usize,
    /// Send the banner file to clients after login, or on connect when no
    /// login is required.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub banner: bool,
    /// Banner text file.
    #[serde(default)]
    pub banner_file: Option<Utf8PathBuf>,
    /// Send the logon banner file to every client as soon as it connects.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub logon_banner: bool,
    /// Logon banner text file.
    #[serde(default)]
    pub logon_banner_file: Option<Utf8PathBuf>,
    /// Re-issue a prompt after each command.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub prompt: bool,
    /// Only privileged accounts may list users when logins are required.
    #[serde(default)]
    #[ortho_config(default = false)]
    pub restrict_user_list: bool,
    /// Path of the persisted credential database.
    #[serde(default = "default_auth_db")]
    #[ortho_config(default = default_auth_db())]
    pub auth_db: Utf8PathBuf,
    /// Optional fortune source file (`%`-separated entries).
    #[serde(default)]
    pub fortune_file: Option<Utf8PathBuf>,
    /// Longest inbound line, in bytes, before the peer is disconnected.
    #[serde(default = "default_max_line_length")]
    #[ortho_config(default = DEFAULT_MAX_LINE_LENGTH)]
    pub max_line_length: usize,
    /// Pause, in milliseconds, between a farewell message and the close.
    #[serde(default = "default_disconnect_delay_ms")]
    #[ortho_config(default = DEFAULT_DISCONNECT_DELAY_MS)]
    pub disconnect_delay_ms: u64,
    /// Tracing filter expression.
    #[serde(default = "default_log_filter")]
    #[ortho_config(default = default_log_filter())]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tcp_enabled: true,
            tcp_host: default_tcp_host(),
            tcp_port: default_tcp_port(),
            unix_enabled: false,
            unix_socket_path: default_unix_socket_path(),
            auth_policy: default_auth_policy(),
            worker_threads: default_worker_threads(),
            banner: false,
            banner_file: None,
            logon_banner: false,
            logon_banner_file: None,
            prompt: false,
            restrict_user_list: false,
            auth_db: default_auth_db(),
            fortune_file: None,
            max_line_length: default_max_line_length(),
            disconnect_delay_ms: default_disconnect_delay_ms(),
            log_filter: default_log_filter(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Checks cross-field constraints that the loaders cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tcp_enabled && !self.unix_enabled {
            return Err(ConfigError::NoTransport);
        }
        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(ConfigError::WorkerThreads {
                requested: self.worker_threads,
                max: MAX_WORKER_THREADS,
            });
        }
        AuthPolicy::try_from(self.auth_policy)?;
        if self.banner && self.banner_file.is_none() {
            return Err(ConfigError::MissingFile { key: "banner_file" });
        }
        if self.logon_banner && self.logon_banner_file.is_none() {
            return Err(ConfigError::MissingFile {
                key: "logon_banner_file",
            });
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::ZeroLineLength);
        }
        Ok(())
    }

    /// Listening endpoints enabled by this configuration.
    #[must_use]
    pub fn endpoints(&self) -> Vec<SocketEndpoint> {
        let mut endpoints = Vec::with_capacity(2);
        if self.tcp_enabled {
            endpoints.push(SocketEndpoint::tcp(self.tcp_host.clone(), self.tcp_port));
        }
        if self.unix_enabled {
            endpoints.push(SocketEndpoint::unix(self.unix_socket_path.clone()));
        }
        endpoints
    }

    /// The configured login policy.
    ///
    /// Out-of-range levels fall back to the strictest policy; call
    /// [`Config::validate`] first to reject them instead.
    #[must_use]
    pub fn policy(&self) -> AuthPolicy {
        AuthPolicy::try_from(self.auth_policy).unwrap_or(AuthPolicy::ChallengeResponse)
    }

    /// Accessor for the log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Accessor for the log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Grace period between a farewell message and closing the socket.
    #[must_use]
    pub fn disconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.disconnect_delay_ms)
    }
}

/// Configuration values rejected by [`Config::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Neither TCP nor Unix transport is enabled.
    #[error("at least one of tcp_enabled or unix_enabled must be set")]
    NoTransport,
    /// Worker pool size out of range.
    #[error("worker_threads must be between 1 and {max}, got {requested}")]
    WorkerThreads { requested: usize, max: usize },
    /// Unknown login policy level.
    #[error(transparent)]
    Policy(#[from] AuthPolicyError),
    /// A feature toggle was enabled without its file.
    #[error("{key} must be set when its feature is enabled")]
    MissingFile { key: &'static str },
    /// Zero maximum line length.
    #[error("max_line_length may not be zero")]
    ZeroLineLength,
}
