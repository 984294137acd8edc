//! Offline administration of the management server's user database.
//!
//! Every subcommand that names a database loads it into a server-role
//! [`mgtsvr_auth::Auth`], applies one change and writes it back. The
//! remaining subcommands are calculators for the hashing and challenge
//! scheme, useful when scripting clients or auditing stored hashes.
//!
//! [`run`] is the whole tool; the binary only wires it to the process's
//! standard streams.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use mgtsvr_auth::{JsonFileStore, UserStore};

mod cli;
mod commands;
mod errors;

use cli::Cli;
use errors::AdminError;

/// Parses `args` and runs the selected subcommand against the JSON user
/// database, writing results to `stdout` and diagnostics to `stderr`.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_store(args, &JsonFileStore, stdout, stderr)
}

fn run_with_store<I, W, E>(args: I, store: &dyn UserStore, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let result = Cli::try_parse_from(args)
        .map_err(AdminError::CliUsage)
        .and_then(|cli| commands::execute(cli.command, store, stdout));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(AdminError::CliUsage(error))
            if matches!(error.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(stderr, "{error}");
            ExitCode::FAILURE
        }
    }
}
