//! Argument definitions for the administration tool.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Offline maintenance of the management server's user database.
#[derive(Parser, Debug)]
#[command(name = "mgtsvr-admin", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: AdminCommand,
}

/// New password material, either in clear or already hashed.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub(crate) struct Secret {
    /// Plaintext password; hashed before it is stored.
    #[arg(long)]
    pub(crate) password: Option<String>,
    /// Stored-hash form as printed by `pwgen`.
    #[arg(long)]
    pub(crate) hash: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum AdminCommand {
    /// Creates a database holding the default accounts.
    Create {
        /// Database file; must not exist yet.
        db: Utf8PathBuf,
    },
    /// Prints every account with its privilege and timestamps.
    List {
        /// Database file.
        db: Utf8PathBuf,
    },
    /// Adds an account.
    Add {
        /// Database file.
        db: Utf8PathBuf,
        /// Account name.
        user: String,
        #[command(flatten)]
        secret: Secret,
        /// Privilege level; negative values are more privileged.
        #[arg(long, default_value_t = mgtsvr_auth::DEFAULT_PRIVILEGE, allow_negative_numbers = true)]
        privilege: i32,
    },
    /// Removes an account.
    Delete {
        /// Database file.
        db: Utf8PathBuf,
        /// Account name.
        user: String,
    },
    /// Replaces an account's password.
    Passwd {
        /// Database file.
        db: Utf8PathBuf,
        /// Account name.
        user: String,
        #[command(flatten)]
        secret: Secret,
    },
    /// Sets an account's privilege level.
    Privilege {
        /// Database file.
        db: Utf8PathBuf,
        /// Account name.
        user: String,
        /// New privilege level.
        #[arg(allow_negative_numbers = true)]
        level: i32,
    },
    /// Logs an account in and out, refreshing its timestamps.
    Loginout {
        /// Database file.
        db: Utf8PathBuf,
        /// Account name.
        user: String,
    },
    /// Prints the stored-hash form of a password.
    Pwgen {
        /// Plaintext password.
        password: String,
    },
    /// Prints the response a client sends for a session.
    Crgen {
        /// Session string issued by the server.
        session: String,
        /// Plaintext password.
        password: String,
    },
    /// Issues a challenge for an account and prints the expected response.
    Cpackgen {
        /// Database file.
        db: Utf8PathBuf,
        /// Account name.
        user: String,
    },
    /// Derives a deterministic logon password from a passphrase and PIN.
    Logongen {
        /// Secret passphrase.
        passphrase: String,
        /// Four digit PIN.
        pin: u32,
    },
}
