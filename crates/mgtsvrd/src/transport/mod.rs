//! Socket transport: listeners plus the single-threaded readiness loop.
//!
//! The multiplexer owns every socket and inbound buffer. Worker threads
//! reach it only through [`OutputNotifier`](crate::registry::OutputNotifier)
//! requests, which wake the poller.

mod errors;
mod handler;
mod listener;
mod multiplexer;
mod stream;
#[cfg(test)]
pub(crate) mod test_utils;

pub use self::errors::ListenerError;
pub use self::handler::ConnectionHandler;
pub(crate) use self::listener::SocketListener;
pub(crate) use self::multiplexer::{Multiplexer, MultiplexerHandle};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
