//! Process entry point: bootstrap, serve, and stop on request.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use mgtsvr_auth::JsonFileStore;
use mgtsvr_config::Config;

use crate::bootstrap::{BootstrapError, ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::CommandExtension;
use crate::fortune::{FortuneError, FortuneService};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::server::{Server, ServerDeps, ServerError};
use crate::shutdown::{ShutdownSignal, SystemShutdownSignal};

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Errors surfaced while running the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The fortune file could not be loaded.
    #[error(transparent)]
    Fortune(#[from] FortuneError),
    /// The server failed to start or stop cleanly.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// The signal listener thread could not be started.
    #[error("failed to start signal listener: {source}")]
    Signals {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Runs the fortune server with the system configuration and signals.
///
/// # Errors
///
/// Returns [`LaunchError`] when startup or shutdown fails.
pub fn run_server() -> Result<(), LaunchError> {
    run_server_with(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        Arc::new(SystemShutdownSignal),
    )
}

pub(crate) fn run_server_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    signal: Arc<dyn ShutdownSignal>,
) -> Result<(), LaunchError> {
    let bootstrapped = bootstrap_with(loader, reporter.as_ref())?;
    info!(
        target: PROCESS_TARGET,
        format = %bootstrapped.telemetry().format(),
        "telemetry installed"
    );
    let config = bootstrapped.into_config();
    let extension = fortune_extension(&config)?;
    let server = Server::start(
        &config,
        ServerDeps {
            store: Arc::new(JsonFileStore),
            extension,
            reporter,
        },
    )?;
    server
        .trigger()
        .fire_on(signal)
        .map_err(|source| LaunchError::Signals { source })?;
    let summary = server.run_until_shutdown()?;
    if !summary.logged_out.is_empty() {
        warn!(
            target: PROCESS_TARGET,
            users = ?summary.logged_out,
            "users were still logged on at shutdown"
        );
    }
    info!(target: PROCESS_TARGET, "server exited");
    Ok(())
}

fn fortune_extension(config: &Config) -> Result<Arc<dyn CommandExtension>, FortuneError> {
    let service = match &config.fortune_file {
        Some(path) => FortuneService::from_file(path)?,
        None => FortuneService::builtin(),
    };
    Ok(Arc::new(service))
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::bootstrap::StaticConfigLoader;
    use crate::health::test_support::RecordingReporter;
    use crate::shutdown::ShutdownError;

    struct ImmediateSignal;

    impl ShutdownSignal for ImmediateSignal {
        fn wait(&self) -> Result<(), ShutdownError> {
            Ok(())
        }
    }

    #[test]
    fn signal_stops_server_and_saves_database() {
        let dir = tempfile::tempdir().expect("temp dir");
        let auth_db =
            Utf8PathBuf::from_path_buf(dir.path().join("auth.json")).expect("utf8 path");
        let config = Config {
            tcp_port: 0,
            auth_db: auth_db.clone(),
            worker_threads: 2,
            ..Config::default()
        };
        let reporter = Arc::new(RecordingReporter::default());

        run_server_with(
            &StaticConfigLoader::new(config),
            Arc::clone(&reporter) as Arc<dyn HealthReporter>,
            Arc::new(ImmediateSignal),
        )
        .expect("server runs and stops");

        assert!(auth_db.exists(), "database written on shutdown");
        let events = reporter.events();
        assert_eq!(events.first().map(String::as_str), Some("bootstrap_starting"));
        assert!(events.iter().any(|event| event == "server_ready"));
        assert_eq!(
            events.last().map(String::as_str),
            Some("shutdown:listeners_closed")
        );
    }

    #[test]
    fn missing_fortune_file_aborts_launch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = Config {
            tcp_port: 0,
            fortune_file: Some(
                Utf8PathBuf::from_path_buf(dir.path().join("absent")).expect("utf8 path"),
            ),
            ..Config::default()
        };
        let error = run_server_with(
            &StaticConfigLoader::new(config),
            Arc::new(RecordingReporter::default()),
            Arc::new(ImmediateSignal),
        )
        .expect_err("launch fails");
        assert!(matches!(error, LaunchError::Fortune(FortuneError::Read { .. })));
    }
}
