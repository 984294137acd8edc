//! Bounded FIFO of command lines shared by the multiplexer and the workers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use crate::registry::ConnectionId;

/// Items held before [`WorkQueue::push`] starts refusing lines.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// One framed line from one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    connection: ConnectionId,
    line: String,
}

impl WorkItem {
    /// Wraps a line received on `connection`.
    #[must_use]
    pub fn new(connection: ConnectionId, line: String) -> Self {
        Self { connection, line }
    }

    /// Originating connection.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Line payload without its delimiter.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }
}

/// Reasons a line could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been shut down.
    #[error("work queue is shut down")]
    ShutDown,
    /// The queue is at capacity.
    #[error("work queue is full ({capacity} items)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    shut_down: bool,
}

/// Thread-safe bounded FIFO with timed dequeue and a shutdown latch.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl WorkQueue {
    /// Creates a queue with [`DEFAULT_QUEUE_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue that holds at most `capacity` items.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item and wakes one waiting worker.
    pub fn push(&self, item: WorkItem) -> Result<(), QueueError> {
        let mut state = self.state();
        if state.shut_down {
            return Err(QueueError::ShutDown);
        }
        if state.items.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Waits up to `timeout` for an item.
    ///
    /// Returns `None` on timeout and, once the queue is shut down, always;
    /// items still queued at that point are never handed out.
    pub fn wait_for_item(&self, timeout: Duration) -> Option<WorkItem> {
        let state = self.state();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |state| {
                !state.shut_down && state.items.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.shut_down {
            return None;
        }
        state.items.pop_front()
    }

    /// Latches the queue shut and wakes every waiter.
    ///
    /// Returns the number of items discarded.
    pub fn shut_down(&self) -> usize {
        let mut state = self.state();
        state.shut_down = true;
        let discarded = state.items.len();
        state.items.clear();
        drop(state);
        self.available.notify_all();
        discarded
    }

    /// Whether [`Self::shut_down`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }
}
