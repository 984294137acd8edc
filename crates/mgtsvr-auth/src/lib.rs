//! Credential store and challenge-response authentication for the
//! management server.
//!
//! The server side ([`Role::Server`]) owns a table of [`UserRecord`]s keyed
//! by username, issues [`ChallengePack`]s and verifies client responses. The
//! client side ([`Role::Client`]) only computes responses. Passwords never
//! cross the wire under the challenge-response scheme: the client proves
//! knowledge of the password hash bound to a fresh random session.
//!
//! Persistence is delegated to a [`UserStore`]; [`JsonFileStore`] is the
//! on-disk implementation used by the daemon and the admin tool.

mod digest;
mod logon;
mod persist;
mod record;
mod store;

pub use digest::{
    DIGEST_LEN, ENCODED_DIGEST_LEN, SESSION_ENTROPY_BYTES, generate_challenge, generate_session,
    hash_password,
};
pub use logon::{LOGON_ALPHABET, LOGON_PASSWORD_LEN, LogonError, PIN_RANGE, derive_logon_password};
pub use persist::{JsonFileStore, MemoryStore, PersistError, UserStore};
pub use record::{ChallengePack, DEFAULT_PRIVILEGE, Timestamp, UserRecord};
pub use store::{Auth, LoginOutcome, Role};

/// Tracing target for credential store events.
pub(crate) const AUTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::auth");
