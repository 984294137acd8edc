//! Test helpers for the transport module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::registry::ConnectionRecord;

use super::ConnectionHandler;

/// Echoes every line back and counts lifecycle events.
#[derive(Debug, Default)]
pub(crate) struct EchoHandler {
    pub(crate) connected: AtomicUsize,
    pub(crate) disconnected: AtomicUsize,
    pub(crate) overflows: AtomicUsize,
    pub(crate) lines: Mutex<Vec<String>>,
}

impl EchoHandler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConnectionHandler for EchoHandler {
    fn connected(&self, record: &Arc<ConnectionRecord>) {
        self.connected.fetch_add(1, Ordering::SeqCst);
        record.send_line("hello");
    }

    fn line_received(&self, record: &Arc<ConnectionRecord>, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());
        if line == "bye" {
            record.send_line("goodbye");
            record.request_close(Duration::from_millis(50));
        } else {
            record.send_line(&format!("echo: {line}"));
        }
    }

    fn line_overflow(&self, record: &Arc<ConnectionRecord>) {
        self.overflows.fetch_add(1, Ordering::SeqCst);
        record.send_line("[line too long]");
        record.request_close(Duration::ZERO);
    }

    fn disconnected(&self, _record: &ConnectionRecord) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub(crate) fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
