//! Failures reported by the administration tool.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use mgtsvr_auth::{LogonError, PersistError};

#[derive(Debug, Error)]
pub(crate) enum AdminError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    #[error("unable to open auth DB {path}: {source}")]
    Open {
        path: Utf8PathBuf,
        #[source]
        source: PersistError,
    },
    #[error("unable to save auth DB {path}: {source}")]
    Save {
        path: Utf8PathBuf,
        #[source]
        source: PersistError,
    },
    #[error("auth DB file {path} already exists")]
    AlreadyExists { path: Utf8PathBuf },
    #[error("user {username} already exists")]
    DuplicateUser { username: String },
    #[error("no such user: {username}")]
    UnknownUser { username: String },
    #[error("unable to log {username} in and out")]
    LoginOut { username: String },
    #[error(transparent)]
    Logon(#[from] LogonError),
}
