//! Composition of the running server and its orderly shutdown.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use mgtsvr_auth::{Auth, PersistError, UserStore};
use mgtsvr_config::{Config, ConfigError};

use crate::dispatch::{
    Banners, CommandExtension, CommandIntake, DispatchError, DispatchSettings, Dispatcher,
    WorkerPool,
};
use crate::health::HealthReporter;
use crate::queue::WorkQueue;
use crate::registry::Registry;
use crate::shutdown::ShutdownTrigger;
use crate::transport::{ConnectionHandler, ListenerError, Multiplexer, MultiplexerHandle};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

/// Prompt re-issued after each command when prompting is enabled.
pub const DEFAULT_PROMPT: &str = "> ";

/// Errors raised while starting or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration failed validation.
    #[error("invalid configuration: {source}")]
    Config {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// A banner file could not be read.
    #[error("failed to read banner file '{path}': {source}")]
    Banner {
        /// Banner file.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The user database could not be loaded.
    #[error("failed to load users: {source}")]
    LoadUsers {
        /// Persistence failure.
        #[source]
        source: PersistError,
    },
    /// The user database could not be saved during shutdown.
    #[error("failed to save users: {source}")]
    SaveUsers {
        /// Persistence failure.
        #[source]
        source: PersistError,
    },
    /// Listening sockets or the event loop failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The worker pool failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Collaborators injected into [`Server::start`].
pub struct ServerDeps {
    /// Backing store for the credential table.
    pub store: Arc<dyn UserStore>,
    /// Handler for commands without the internal marker.
    pub extension: Arc<dyn CommandExtension>,
    /// Lifecycle event sink.
    pub reporter: Arc<dyn HealthReporter>,
}

/// What the orderly shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Queued lines dropped when the queue closed.
    pub discarded: usize,
    /// Users that were still logged on and were logged out.
    pub logged_out: Vec<String>,
}

/// A running server: listeners, event loop and worker pool.
pub struct Server {
    auth: Arc<Auth>,
    registry: Arc<Registry>,
    queue: Arc<WorkQueue>,
    dispatcher: Arc<Dispatcher>,
    trigger: ShutdownTrigger,
    workers: WorkerPool,
    multiplexer: MultiplexerHandle,
    store: Arc<dyn UserStore>,
    auth_db: Utf8PathBuf,
    reporter: Arc<dyn HealthReporter>,
}

impl Server {
    /// Loads users, binds every configured endpoint and starts the threads.
    ///
    /// A missing user database is not an error: the server starts with an
    /// empty table and creates the file on shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if configuration, banners, the user database,
    /// the listeners or the workers cannot be set up. Nothing is left running
    /// on failure.
    pub fn start(config: &Config, deps: ServerDeps) -> Result<Self, ServerError> {
        let ServerDeps {
            store,
            extension,
            reporter,
        } = deps;
        config
            .validate()
            .map_err(|source| ServerError::Config { source })?;
        let banners = read_banners(config)?;

        let auth = Arc::new(Auth::server());
        match auth.load_users(store.as_ref(), config.auth_db.as_std_path()) {
            Ok(_) => {}
            Err(PersistError::NotFound { path }) => {
                warn!(
                    target: SERVER_TARGET,
                    path = %path.display(),
                    "user database missing, starting with no users"
                );
            }
            Err(source) => return Err(ServerError::LoadUsers { source }),
        }

        let registry = Arc::new(Registry::new());
        let queue = Arc::new(WorkQueue::new());
        let trigger = ShutdownTrigger::new();
        let settings = DispatchSettings {
            policy: config.policy(),
            prompt: config.prompt.then(|| DEFAULT_PROMPT.to_owned()),
            restrict_user_list: config.restrict_user_list,
            disconnect_delay: config.disconnect_delay(),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&auth),
            Arc::clone(&registry),
            extension,
            trigger.clone(),
            settings,
            banners,
        ));

        let handler: Arc<dyn ConnectionHandler> = Arc::new(CommandIntake::new(
            Arc::clone(&queue),
            Arc::clone(&dispatcher),
        ));
        let endpoints = config.endpoints();
        let multiplexer = Multiplexer::bind(
            &endpoints,
            Arc::clone(&registry),
            handler,
            config.max_line_length,
        )?;
        let workers = WorkerPool::start(config.worker_threads, &queue, &dispatcher)?;
        let multiplexer = match multiplexer.start() {
            Ok(handle) => handle,
            Err(error) => {
                queue.shut_down();
                if let Err(join_error) = workers.join() {
                    warn!(target: SERVER_TARGET, error = %join_error, "worker pool failed");
                }
                return Err(error.into());
            }
        };

        let mut described: Vec<String> = endpoints.iter().map(ToString::to_string).collect();
        if let Some(addr) = multiplexer.tcp_addr() {
            described.push(format!("bound tcp://{addr}"));
        }
        reporter.server_ready(&described, auth.user_count());

        Ok(Self {
            auth,
            registry,
            queue,
            dispatcher,
            trigger,
            workers,
            multiplexer,
            store,
            auth_db: config.auth_db.clone(),
            reporter,
        })
    }

    /// Address of the TCP listener, if TCP is enabled.
    #[must_use]
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.multiplexer.tcp_addr()
    }

    /// Trigger that stops the server; fired by `DOWN` and by signals.
    #[must_use]
    pub fn trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// The live credential table.
    #[must_use]
    pub fn auth(&self) -> &Arc<Auth> {
        &self.auth
    }

    /// Number of connected clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Blocks until the shutdown trigger fires, then shuts down.
    ///
    /// # Errors
    ///
    /// See [`Server::shutdown`].
    pub fn run_until_shutdown(self) -> Result<ShutdownSummary, ServerError> {
        let reason = self.trigger.wait();
        info!(target: SERVER_TARGET, reason = %reason, "stopping server");
        self.shutdown()
    }

    /// Stops the server in order: notice to clients, queue closed, workers
    /// joined, users logged out, database saved, sockets closed.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`ServerError`] raised by a shutdown step.
    pub fn shutdown(self) -> Result<ShutdownSummary, ServerError> {
        let Self {
            auth,
            queue,
            dispatcher,
            trigger,
            workers,
            multiplexer,
            store,
            auth_db,
            reporter,
            ..
        } = self;
        trigger.fire("server shutdown");
        let mut first_error: Option<ServerError> = None;

        dispatcher.announce_shutdown();
        reporter.shutdown_step("clients_notified");

        let discarded = queue.shut_down();
        reporter.shutdown_step("queue_closed");

        if let Err(error) = workers.join() {
            first_error.get_or_insert(error.into());
        }
        reporter.shutdown_step("workers_stopped");

        let logged_out = auth.logout_all();
        reporter.shutdown_step("users_logged_out");

        if let Err(source) = auth.save_users(store.as_ref(), auth_db.as_std_path()) {
            first_error.get_or_insert(ServerError::SaveUsers { source });
        }
        reporter.shutdown_step("users_saved");

        multiplexer.shutdown();
        if let Err(error) = multiplexer.join() {
            first_error.get_or_insert(error.into());
        }
        reporter.shutdown_step("listeners_closed");

        match first_error {
            Some(error) => Err(error),
            None => {
                info!(
                    target: SERVER_TARGET,
                    discarded,
                    logged_out = logged_out.len(),
                    "shutdown sequence completed"
                );
                Ok(ShutdownSummary {
                    discarded,
                    logged_out,
                })
            }
        }
    }
}

fn read_banners(config: &Config) -> Result<Banners, ServerError> {
    let read = |enabled: bool, path: Option<&Utf8PathBuf>| -> Result<Option<String>, ServerError> {
        match path {
            Some(path) if enabled => read_banner(path).map(Some),
            _ => Ok(None),
        }
    };
    Ok(Banners {
        banner: read(config.banner, config.banner_file.as_ref())?,
        logon_banner: read(config.logon_banner, config.logon_banner_file.as_ref())?,
    })
}

fn read_banner(path: &Utf8Path) -> Result<String, ServerError> {
    fs::read_to_string(path).map_err(|source| ServerError::Banner {
        path: path.to_path_buf(),
        source,
    })
}
