//! Persistence collaborators for the credential table.
//!
//! The table is stored as a JSON object with a single `auth_db` member
//! holding the array of records. Writes go through a temporary file in the
//! destination directory followed by a rename so a crash never leaves a
//! truncated database behind.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::record::UserRecord;

/// Loads and saves the full set of user records.
pub trait UserStore: Send + Sync {
    /// Reads every record from `resource`.
    ///
    /// Returns [`PersistError::NotFound`] when the resource does not exist.
    fn load(&self, resource: &Path) -> Result<Vec<UserRecord>, PersistError>;

    /// Replaces the content of `resource` with `records`.
    fn save(&self, resource: &Path, records: &[UserRecord]) -> Result<(), PersistError>;
}

/// Errors raised while loading or saving the credential table.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The resource does not exist yet.
    #[error("user database '{}' does not exist", path.display())]
    NotFound {
        /// Missing resource.
        path: PathBuf,
    },
    /// Reading or writing the resource failed.
    #[error("failed to access user database '{}': {source}", path.display())]
    Io {
        /// Resource being accessed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The resource content is not a valid user database.
    #[error("user database '{}' is malformed: {source}", path.display())]
    Format {
        /// Resource being decoded.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// Two records share a username.
    #[error("user database '{}' lists '{username}' more than once", path.display())]
    DuplicateUser {
        /// Resource being decoded.
        path: PathBuf,
        /// Repeated username.
        username: String,
    },
    /// Persistence was requested on a client-role instance.
    #[error("only a server-role credential store can be persisted")]
    WrongRole,
}

#[derive(Serialize, Deserialize)]
struct AuthDb {
    auth_db: Vec<UserRecord>,
}

#[derive(Serialize)]
struct AuthDbRef<'a> {
    auth_db: &'a [UserRecord],
}

/// Stores the table as pretty-printed JSON on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFileStore;

impl UserStore for JsonFileStore {
    fn load(&self, resource: &Path) -> Result<Vec<UserRecord>, PersistError> {
        let file = File::open(resource).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                PersistError::NotFound {
                    path: resource.to_path_buf(),
                }
            } else {
                PersistError::Io {
                    path: resource.to_path_buf(),
                    source,
                }
            }
        })?;
        let database: AuthDb =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                PersistError::Format {
                    path: resource.to_path_buf(),
                    source,
                }
            })?;
        Ok(database.auth_db)
    }

    fn save(&self, resource: &Path, records: &[UserRecord]) -> Result<(), PersistError> {
        let io_error = |source| PersistError::Io {
            path: resource.to_path_buf(),
            source,
        };
        let directory = resource
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = NamedTempFile::new_in(directory).map_err(io_error)?;
        {
            let mut writer = BufWriter::new(staging.as_file());
            serde_json::to_writer_pretty(&mut writer, &AuthDbRef { auth_db: records }).map_err(
                |source| PersistError::Format {
                    path: resource.to_path_buf(),
                    source,
                },
            )?;
            writer.write_all(b"\n").map_err(io_error)?;
            writer.flush().map_err(io_error)?;
        }
        staging
            .persist(resource)
            .map_err(|error| io_error(error.error))?;
        Ok(())
    }
}

/// Keeps databases in memory, keyed by resource path. Used by tests and by
/// tooling that never touches disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    databases: Mutex<HashMap<PathBuf, Vec<UserRecord>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a database has been saved under `resource`.
    #[must_use]
    pub fn contains(&self, resource: &Path) -> bool {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(resource)
    }
}

impl UserStore for MemoryStore {
    fn load(&self, resource: &Path) -> Result<Vec<UserRecord>, PersistError> {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
            .ok_or_else(|| PersistError::NotFound {
                path: resource.to_path_buf(),
            })
    }

    fn save(&self, resource: &Path, records: &[UserRecord]) -> Result<(), PersistError> {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.to_path_buf(), records.to_vec());
        Ok(())
    }
}
