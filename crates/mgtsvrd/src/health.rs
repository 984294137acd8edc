//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use mgtsvr_config::Config;

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listeners and workers are running.
    fn server_ready(&self, endpoints: &[String], users: usize);

    /// Invoked as each shutdown step completes.
    fn shutdown_step(&self, step: &'static str);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn server_ready(&self, endpoints: &[String], users: usize) {
        (**self).server_ready(endpoints, users);
    }

    fn shutdown_step(&self, step: &'static str) {
        (**self).shutdown_step(step);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            policy = %config.policy(),
            workers = config.worker_threads,
            auth_db = %config.auth_db,
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn server_ready(&self, endpoints: &[String], users: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "server_ready",
            endpoints = ?endpoints,
            users,
            "server accepting connections"
        );
    }

    fn shutdown_step(&self, step: &'static str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_step",
            step,
            "shutdown progress"
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, PoisonError};

    use super::*;

    /// Reporter that records event names for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingReporter {
        events: Mutex<Vec<String>>,
    }

    impl RecordingReporter {
        fn push(&self, event: impl Into<String>) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.into());
        }

        pub(crate) fn events(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl HealthReporter for RecordingReporter {
        fn bootstrap_starting(&self) {
            self.push("bootstrap_starting");
        }

        fn bootstrap_succeeded(&self, _config: &Config) {
            self.push("bootstrap_succeeded");
        }

        fn bootstrap_failed(&self, _error: &BootstrapError) {
            self.push("bootstrap_failed");
        }

        fn server_ready(&self, _endpoints: &[String], _users: usize) {
            self.push("server_ready");
        }

        fn shutdown_step(&self, step: &'static str) {
            self.push(format!("shutdown:{step}"));
        }
    }
}
