//! Command dispatch for connected clients.
//!
//! The multiplexer hands each complete line to [`CommandIntake`], which
//! queues it. [`WorkerPool`] threads pop items and run them through the
//! [`Dispatcher`]: login steps advance the per-connection state machine,
//! and logged-on lines are tokenized into commands. Lines starting with
//! [`INTERNAL_MARKER`] run the built-ins (`EXIT`, `WHOAMI`, `HELP`, `USERS`,
//! `BROADCAST`, `DOWN`); everything else goes to the configured
//! [`CommandExtension`].

mod builtin;
mod command;
mod errors;
mod extension;
mod intake;
mod messages;
mod session;
mod worker;


pub use self::builtin::{ADMIN_PRIVILEGE, OPERATOR_PRIVILEGE};
pub use self::command::{CommandLine, INTERNAL_MARKER, tokenize};
pub use self::errors::DispatchError;
pub use self::extension::{CommandContext, CommandExtension, CommandOutcome, NoExtension};
pub use self::intake::CommandIntake;
pub use self::messages::command_not_recognized;
pub use self::session::{Banners, DispatchSettings, Dispatcher};
pub use self::worker::{DEQUEUE_TIMEOUT, WorkerPool};

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
