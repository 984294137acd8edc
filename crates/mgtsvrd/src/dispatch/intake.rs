//! Bridge from the event loop into the work queue.

use std::sync::Arc;

use tracing::warn;

use super::DISPATCH_TARGET;
use super::messages;
use super::session::Dispatcher;
use crate::queue::{QueueError, WorkItem, WorkQueue};
use crate::registry::ConnectionRecord;
use crate::transport::ConnectionHandler;

/// Connection handler that greets clients and queues their lines.
pub struct CommandIntake {
    queue: Arc<WorkQueue>,
    dispatcher: Arc<Dispatcher>,
}

impl CommandIntake {
    /// Creates an intake feeding `queue`.
    #[must_use]
    pub fn new(queue: Arc<WorkQueue>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { queue, dispatcher }
    }
}

impl ConnectionHandler for CommandIntake {
    fn connected(&self, record: &Arc<ConnectionRecord>) {
        self.dispatcher.greet(record);
    }

    fn line_received(&self, record: &Arc<ConnectionRecord>, line: String) {
        match self.queue.push(WorkItem::new(record.id(), line)) {
            Ok(()) => {}
            Err(QueueError::ShutDown) => {}
            Err(error @ QueueError::Full { .. }) => {
                warn!(
                    target: DISPATCH_TARGET,
                    connection = %record.id(),
                    error = %error,
                    "dropping line"
                );
                record.send_line(messages::SERVER_BUSY);
            }
        }
    }

    fn line_overflow(&self, record: &Arc<ConnectionRecord>) {
        self.dispatcher.reject_overflow(record);
    }

    fn disconnected(&self, record: &ConnectionRecord) {
        self.dispatcher.release(record);
    }
}
