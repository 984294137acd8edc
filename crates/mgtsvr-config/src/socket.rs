//! Listening endpoints and the filesystem work a UNIX socket needs.

use std::fmt;
use std::fs::DirBuilder;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Mode of a directory created to hold the server's socket.
#[cfg(unix)]
const SOCKET_DIRECTORY_MODE: u32 = 0o700;

/// One address the server listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEndpoint {
    /// TCP listener on `host:port`; port 0 asks the OS for a free port.
    Tcp {
        /// Interface to bind.
        host: String,
        /// Port to bind.
        port: u16,
    },
    /// UNIX domain stream socket at `path`.
    Unix {
        /// Filesystem location of the socket.
        path: Utf8PathBuf,
    },
}

impl SocketEndpoint {
    /// TCP endpoint.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// UNIX socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Socket path for UNIX endpoints.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        if let Self::Unix { path } = self {
            Some(path)
        } else {
            None
        }
    }

    /// Creates the directory that will hold a UNIX socket, owner-only.
    ///
    /// TCP endpoints and bare file names need nothing. An existing
    /// directory is left as it is.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the directory cannot be made.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(directory) = self
            .unix_path()
            .and_then(Utf8Path::parent)
            .filter(|parent| !parent.as_str().is_empty())
        else {
            return Ok(());
        };
        if directory.is_dir() {
            return Ok(());
        }
        socket_directory_builder()
            .create(directory)
            .map_err(|source| SocketPreparationError {
                directory: directory.to_path_buf(),
                source,
            })
    }
}

fn socket_directory_builder() -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(SOCKET_DIRECTORY_MODE);
    }
    builder
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
            Self::Unix { path } => write!(formatter, "unix://{path}"),
        }
    }
}

/// The socket directory could not be created.
#[derive(Debug, Error)]
#[error("cannot create socket directory '{directory}': {source}")]
pub struct SocketPreparationError {
    /// Directory that was being created.
    pub directory: Utf8PathBuf,
    /// Underlying IO error.
    #[source]
    pub source: io::Error,
}
