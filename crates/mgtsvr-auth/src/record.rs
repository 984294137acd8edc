//! User records and challenge packs.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Privilege level granted to newly created accounts.
pub const DEFAULT_PRIVILEGE: i32 = 0;

/// Wall-clock instant stored as milliseconds since the Unix epoch.
///
/// Zero means "never"; records created before a user ever logged in carry it
/// in their `last_login` and `last_seen` fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The "never happened" sentinel.
    pub const NEVER: Self = Self(0);

    /// Captures the current system time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self(millis)
    }

    /// Builds a timestamp from raw epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Raw epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Whether this is the [`Timestamp::NEVER`] sentinel.
    #[must_use]
    pub const fn is_never(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            return formatter.write_str("never");
        }
        let nanos = i128::from(self.0) * 1_000_000;
        let rendered = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .and_then(|instant| instant.format(&Rfc3339).ok());
        match rendered {
            Some(text) => formatter.write_str(&text),
            None => write!(formatter, "{}ms", self.0),
        }
    }
}

/// A single account in the credential table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique account name.
    pub username: String,
    /// Base64 SHA-384 digest of the password.
    pub password_hash: String,
    /// Whether a session is currently logged on. Never persisted.
    #[serde(skip)]
    pub logged_in: bool,
    /// Most recent successful login.
    #[serde(default)]
    pub last_login: Timestamp,
    /// Most recent logout.
    #[serde(default)]
    pub last_seen: Timestamp,
    /// When the account was created.
    #[serde(default)]
    pub creation: Timestamp,
    /// Signed authority level; lower is more powerful.
    #[serde(default)]
    pub privilege: i32,
}

impl UserRecord {
    /// Builds a fresh record from an already hashed password.
    #[must_use]
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            logged_in: false,
            last_login: Timestamp::NEVER,
            last_seen: Timestamp::NEVER,
            creation: Timestamp::now(),
            privilege: DEFAULT_PRIVILEGE,
        }
    }
}

/// Server-side state for one login attempt.
///
/// Only `session` is ever sent to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengePack {
    /// Account the challenge was issued for.
    pub username: String,
    /// Random session value sent to the client.
    pub session: String,
    /// Response the client must send back.
    pub expected_response: String,
}

impl fmt::Debug for ChallengePack {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ChallengePack")
            .field("username", &self.username)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_renders_as_word() {
        assert_eq!(Timestamp::NEVER.to_string(), "never");
    }

    #[test]
    fn renders_rfc3339() {
        let stamp = Timestamp::from_millis(1_700_000_000_123);
        assert_eq!(stamp.to_string(), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn logged_in_flag_is_not_serialised() {
        let mut record = UserRecord::new("alice", "hash");
        record.logged_in = true;
        let json = serde_json::to_string(&record).expect("serialise record");
        assert!(!json.contains("logged_in"));
        let restored: UserRecord = serde_json::from_str(&json).expect("deserialise record");
        assert!(!restored.logged_in);
        assert_eq!(restored.username, "alice");
    }

    #[test]
    fn debug_output_hides_expected_response() {
        let pack = ChallengePack {
            username: "alice".to_owned(),
            session: "session".to_owned(),
            expected_response: "secret-response".to_owned(),
        };
        assert!(!format!("{pack:?}").contains("secret-response"));
    }
}
