//! Shutdown signalling.
//!
//! A [`ShutdownTrigger`] is the single latch both termination signals and
//! the `DOWN` command fire; the binary blocks on it before running the
//! orderly shutdown.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Latch {
    fired: Mutex<Option<String>>,
    changed: Condvar,
}

/// Cloneable one-shot latch that requests an orderly shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    latch: Arc<Latch>,
}

impl ShutdownTrigger {
    /// Creates an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn fired(&self) -> MutexGuard<'_, Option<String>> {
        self.latch
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fires the trigger. Only the first reason is kept.
    pub fn fire(&self, reason: impl Into<String>) {
        let mut fired = self.fired();
        if fired.is_none() {
            let reason = reason.into();
            info!(target: PROCESS_TARGET, reason = %reason, "shutdown requested");
            *fired = Some(reason);
        }
        drop(fired);
        self.latch.changed.notify_all();
    }

    /// Whether the trigger has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired().is_some()
    }

    /// Blocks until the trigger fires and returns the reason.
    pub fn wait(&self) -> String {
        let fired = self
            .latch
            .changed
            .wait_while(self.fired(), |fired| fired.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        fired.clone().unwrap_or_default()
    }

    /// Waits up to `timeout`; returns the reason if the trigger fired.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<String> {
        let (fired, _) = self
            .latch
            .changed
            .wait_timeout_while(self.fired(), timeout, |fired| fired.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        fired.clone()
    }

    /// Fires the trigger once `signal` reports a termination request.
    ///
    /// Runs on a detached thread; if the server shuts down for another
    /// reason first, the thread simply ends with the process.
    pub fn fire_on(&self, signal: Arc<dyn ShutdownSignal>) -> io::Result<()> {
        let trigger = self.clone();
        std::thread::Builder::new()
            .name("mgtsvr-signals".to_owned())
            .spawn(move || match signal.wait() {
                Ok(()) => trigger.fire("termination signal"),
                Err(error) => {
                    tracing::error!(target: PROCESS_TARGET, error = %error, "signal listener failed");
                }
            })
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    struct ImmediateSignal;

    impl ShutdownSignal for ImmediateSignal {
        fn wait(&self) -> Result<(), ShutdownError> {
            Ok(())
        }
    }

    #[test]
    fn trigger_wakes_waiters_with_first_reason() {
        let trigger = ShutdownTrigger::new();
        let waiter = {
            let trigger = trigger.clone();
            thread::spawn(move || trigger.wait())
        };
        trigger.fire("first");
        trigger.fire("second");
        assert_eq!(waiter.join().expect("waiter"), "first");
        assert!(trigger.is_fired());
    }

    #[test]
    fn wait_timeout_expires_when_unfired() {
        let trigger = ShutdownTrigger::new();
        assert_eq!(trigger.wait_timeout(Duration::from_millis(20)), None);
        assert!(!trigger.is_fired());
    }

    #[test]
    fn signal_listener_fires_trigger() {
        let trigger = ShutdownTrigger::new();
        trigger
            .fire_on(Arc::new(ImmediateSignal))
            .expect("spawn listener");
        assert_eq!(
            trigger.wait_timeout(Duration::from_secs(2)).as_deref(),
            Some("termination signal")
        );
    }
}
