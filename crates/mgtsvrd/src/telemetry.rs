//! Process-wide tracing subscriber for the fortune server.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt;

use mgtsvr_config::{Config, LogFormat};

/// Format of the subscriber that won the race to install.
static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Proof that a subscriber is installed, and which format it writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Output format of the installed subscriber.
    #[must_use]
    pub fn format(self) -> LogFormat {
        self.format
    }
}

/// Telemetry could not be set up.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `log_filter` is not a valid `EnvFilter` directive list.
    #[error("invalid log filter '{filter}': {reason}")]
    Filter {
        /// Directive text as configured.
        filter: String,
        /// Parser complaint.
        reason: String,
    },
    /// Another subscriber was installed outside this module.
    #[error("failed to install telemetry subscriber: {0}")]
    Install(#[source] SetGlobalDefaultError),
}

/// Installs the global subscriber on the first call.
///
/// Later calls return the handle of the subscriber already in place, so
/// tests that start several servers in one process work. Log lines go to
/// stderr with RFC 3339 UTC timestamps; colour is used only on a terminal.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the filter does not parse or a foreign
/// subscriber is already installed.
///
/// # Examples
///
/// ```rust
/// use mgtsvr_config::Config;
/// use mgtsvrd::telemetry;
///
/// # fn main() -> Result<(), mgtsvrd::TelemetryError> {
/// let config = Config::default();
/// let first = telemetry::initialise(&config)?;
/// assert_eq!(telemetry::initialise(&config)?, first);
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(config))
        .map(|format| TelemetryHandle { format: *format })
}

fn install(config: &Config) -> Result<LogFormat, TelemetryError> {
    let directives = config.log_filter();
    let filter = EnvFilter::try_new(directives).map_err(|error| TelemetryError::Filter {
        filter: directives.to_owned(),
        reason: error.to_string(),
    })?;
    let base = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let format = config.log_format();
    let installed = match format {
        LogFormat::Compact => tracing::subscriber::set_global_default(base.compact().finish()),
        LogFormat::Json => {
            tracing::subscriber::set_global_default(base.json().flatten_event(true).finish())
        }
    };
    installed.map_err(TelemetryError::Install)?;
    Ok(format)
}
