//! Hooks the event loop calls into.

use std::sync::Arc;

use crate::registry::ConnectionRecord;

/// Receives connection lifecycle events from the multiplexer thread.
///
/// Implementations must not block: every call runs on the event loop.
pub trait ConnectionHandler: Send + Sync {
    /// A client was accepted and registered.
    fn connected(&self, record: &Arc<ConnectionRecord>);

    /// A complete, non-empty line arrived.
    fn line_received(&self, record: &Arc<ConnectionRecord>, line: String);

    /// The peer sent more than `max_line_length` bytes without a delimiter.
    /// Further input from this connection is discarded.
    fn line_overflow(&self, record: &Arc<ConnectionRecord>);

    /// The connection was removed from the registry and is being closed.
    fn disconnected(&self, record: &ConnectionRecord);
}
