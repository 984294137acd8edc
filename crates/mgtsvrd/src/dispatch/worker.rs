//! Worker threads that drain the work queue.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::session::Dispatcher;
use crate::queue::{WorkItem, WorkQueue};

/// How long a worker blocks on an empty queue before re-checking shutdown.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(20);

type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads executing work items.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Spawn`] if a thread cannot be created. The
    /// queue is then shut down and the workers already started are joined.
    pub fn start(
        count: usize,
        queue: &Arc<WorkQueue>,
        dispatcher: &Arc<Dispatcher>,
    ) -> Result<Self, DispatchError> {
        Self::launch(count, queue, dispatcher, |index, body| {
            thread::Builder::new()
                .name(format!("mgtsvr-worker-{index}"))
                .spawn(body)
        })
    }

    pub(super) fn launch<S>(
        count: usize,
        queue: &Arc<WorkQueue>,
        dispatcher: &Arc<Dispatcher>,
        mut spawn: S,
    ) -> Result<Self, DispatchError>
    where
        S: FnMut(usize, WorkerBody) -> io::Result<JoinHandle<()>>,
    {
        let mut pool = Self {
            workers: Vec::with_capacity(count),
        };
        for index in 0..count {
            let worker_queue = Arc::clone(queue);
            let dispatcher = Arc::clone(dispatcher);
            let body: WorkerBody = Box::new(move || run_worker(index, &worker_queue, &dispatcher));
            match spawn(index, body) {
                Ok(worker) => pool.workers.push(worker),
                Err(source) => {
                    let discarded = queue.shut_down();
                    warn!(
                        target: DISPATCH_TARGET,
                        started = pool.len(),
                        discarded,
                        error = %source,
                        "worker spawn failed; stopping partial pool"
                    );
                    if let Err(join_error) = pool.join() {
                        warn!(target: DISPATCH_TARGET, error = %join_error, "partial pool join failed");
                    }
                    return Err(DispatchError::Spawn { source });
                }
            }
        }
        info!(target: DISPATCH_TARGET, workers = count, "worker pool started");
        Ok(pool)
    }

    /// Number of workers started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for every worker to exit. The queue must already be shut down.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerPanic`] if any worker thread panicked
    /// outside item processing.
    pub fn join(self) -> Result<(), DispatchError> {
        let panicked = self
            .workers
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        if panicked == 0 {
            Ok(())
        } else {
            Err(DispatchError::WorkerPanic { panicked })
        }
    }
}

fn run_worker(index: usize, queue: &WorkQueue, dispatcher: &Dispatcher) {
    debug!(target: DISPATCH_TARGET, worker = index, "worker started");
    while !queue.is_shut_down() {
        if let Some(item) = queue.wait_for_item(DEQUEUE_TIMEOUT)
            && let Err(error) = process(dispatcher, &item)
        {
            match error {
                DispatchError::UnknownConnection { .. } => {
                    debug!(target: DISPATCH_TARGET, worker = index, error = %error, "item skipped");
                }
                other => {
                    error!(target: DISPATCH_TARGET, worker = index, error = %other, "item failed");
                }
            }
        }
    }
    debug!(target: DISPATCH_TARGET, worker = index, "worker exiting");
}

/// Runs one item, turning a panic into [`DispatchError::Panicked`].
fn process(dispatcher: &Dispatcher, item: &WorkItem) -> Result<(), DispatchError> {
    panic::catch_unwind(AssertUnwindSafe(|| dispatcher.handle(item))).unwrap_or_else(|payload| {
        Err(DispatchError::Panicked {
            connection: item.connection(),
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
