//! Error types for command dispatch failures.

use std::io;

use thiserror::Error;

use crate::registry::ConnectionId;

/// Errors surfaced while processing work items.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The connection was removed before its item was processed.
    #[error("connection {connection} is no longer registered")]
    UnknownConnection {
        /// Connection the item belonged to.
        connection: ConnectionId,
    },

    /// Processing one item panicked; the worker survived.
    #[error("command from connection {connection} panicked: {message}")]
    Panicked {
        /// Connection the item belonged to.
        connection: ConnectionId,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// One or more worker threads ended by panicking.
    #[error("{panicked} worker thread(s) panicked")]
    WorkerPanic {
        /// Number of workers that panicked.
        panicked: usize,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
