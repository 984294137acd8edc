//! Line-oriented command server with challenge-response login.
//!
//! Clients connect over TCP or a UNIX socket and exchange newline-delimited
//! text. One event-loop thread owns every socket (see [`transport`]); it
//! frames input into lines and queues them. A fixed pool of workers drains
//! the queue and runs each line through the per-connection login state
//! machine or the command dispatcher ([`dispatch`]). Replies are written to
//! the connection's outbound buffer and flushed by the event loop.
//!
//! The binary serves fortunes through [`FortuneService`]; other services
//! plug in by implementing [`CommandExtension`] and calling
//! [`Server::start`].

mod bootstrap;
mod channel;
pub mod dispatch;
mod fortune;
mod health;
mod launch;
mod queue;
mod registry;
mod server;
mod shutdown;
pub mod telemetry;
pub mod transport;

pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use channel::FramedChannel;
pub use dispatch::{CommandContext, CommandExtension, CommandOutcome, NoExtension};
pub use fortune::{FortuneError, FortuneService};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use launch::{LaunchError, run_server};
pub use queue::{DEFAULT_QUEUE_CAPACITY, QueueError, WorkItem, WorkQueue};
pub use registry::{
    AuthState, ConnectionId, ConnectionRecord, OutputGuard, OutputNotifier, Registry, SessionState,
};
pub use server::{DEFAULT_PROMPT, Server, ServerDeps, ServerError, ShutdownSummary};
pub use shutdown::{ShutdownError, ShutdownSignal, ShutdownTrigger, SystemShutdownSignal};
pub use telemetry::{TelemetryError, TelemetryHandle};
