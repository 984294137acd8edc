//! Role-checked credential store.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::AUTH_TARGET;
use crate::digest::{generate_challenge, generate_session, hash_password};
use crate::persist::{PersistError, UserStore};
use crate::record::{ChallengePack, Timestamp, UserRecord};

/// Which side of the protocol an [`Auth`] instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// May only compute challenge responses.
    Client,
    /// Owns the user table; issues and verifies challenges.
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// Result of [`Auth::log_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The response matched and the user is now logged in.
    Accepted,
    /// Wrong response, mismatched pack, unknown user or client role.
    Rejected,
    /// The response matched but the user already holds a session.
    AlreadyLoggedOn,
}

/// Credential store and challenge-response engine.
///
/// Operations that do not apply to the instance's [`Role`] return `None` or
/// `false`. A single mutex guards the user table; it is released before any
/// persistence I/O.
pub struct Auth {
    role: Role,
    users: Mutex<BTreeMap<String, UserRecord>>,
}

impl fmt::Debug for Auth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Auth")
            .field("role", &self.role)
            .field("users", &self.user_count())
            .finish()
    }
}

impl Auth {
    /// Creates an empty store playing `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            users: Mutex::new(BTreeMap::new()),
        }
    }

    /// Shorthand for a server-role store.
    #[must_use]
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Shorthand for a client-role instance.
    #[must_use]
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// The role this instance plays.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    fn table(&self) -> Option<MutexGuard<'_, BTreeMap<String, UserRecord>>> {
        (self.role == Role::Server)
            .then(|| self.users.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn with_user<T>(&self, username: &str, read: impl FnOnce(&mut UserRecord) -> T) -> Option<T> {
        let mut table = self.table()?;
        table.get_mut(username).map(read)
    }

    /// Computes the response a client sends for `session`.
    #[must_use]
    pub fn challenge_response(&self, session: &str, password: &str) -> Option<String> {
        (self.role == Role::Client)
            .then(|| generate_challenge(session, &hash_password(password)))
    }

    /// Issues a fresh challenge for `username`.
    #[must_use]
    pub fn challenge(&self, username: &str) -> Option<ChallengePack> {
        let password_hash = self.with_user(username, |record| record.password_hash.clone())?;
        let session = generate_session();
        let expected_response = generate_challenge(&session, &password_hash);
        debug!(target: AUTH_TARGET, username, "issued challenge");
        Some(ChallengePack {
            username: username.to_owned(),
            session,
            expected_response,
        })
    }

    /// Verifies `response` against `pack` and logs the user in on success.
    #[must_use]
    pub fn authenticate(&self, username: &str, pack: &ChallengePack, response: &str) -> bool {
        if pack.username != username || pack.expected_response != response {
            return false;
        }
        self.force_authenticate(username)
    }

    /// Verifies `response` and logs the user in unless already logged in.
    ///
    /// The logged-in check and the login happen under one table lock, so
    /// two connections racing for the same account cannot both succeed.
    #[must_use]
    pub fn log_on(&self, username: &str, pack: &ChallengePack, response: &str) -> LoginOutcome {
        if pack.username != username || pack.expected_response != response {
            return LoginOutcome::Rejected;
        }
        self.with_user(username, |record| {
            if record.logged_in {
                return LoginOutcome::AlreadyLoggedOn;
            }
            record.logged_in = true;
            record.last_login = Timestamp::now();
            LoginOutcome::Accepted
        })
        .unwrap_or(LoginOutcome::Rejected)
    }

    /// Marks `username` logged in without a challenge.
    ///
    /// Only for local administrative tooling; never reachable from the wire.
    #[must_use]
    pub fn force_authenticate(&self, username: &str) -> bool {
        self.with_user(username, |record| {
            record.logged_in = true;
            record.last_login = Timestamp::now();
        })
        .is_some()
    }

    /// Marks `username` logged out. Fails if the user was not logged in.
    #[must_use]
    pub fn logout(&self, username: &str) -> bool {
        self.with_user(username, |record| {
            if !record.logged_in {
                return false;
            }
            record.logged_in = false;
            record.last_seen = Timestamp::now();
            true
        })
        .unwrap_or(false)
    }

    /// Logs out every logged-in user and returns their names.
    #[must_use]
    pub fn logout_all(&self) -> Vec<String> {
        let Some(mut table) = self.table() else {
            return Vec::new();
        };
        let now = Timestamp::now();
        table
            .values_mut()
            .filter(|record| record.logged_in)
            .map(|record| {
                record.logged_in = false;
                record.last_seen = now;
                record.username.clone()
            })
            .collect()
    }

    /// Adds a user from an already hashed password.
    ///
    /// Accepting a hash is only safe for local tooling; the hash is the
    /// secret the challenge protocol protects.
    #[must_use]
    pub fn add_user(&self, username: &str, password_hash: &str) -> bool {
        let Some(mut table) = self.table() else {
            return false;
        };
        match table.entry(username.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(UserRecord::new(username, password_hash));
                true
            }
        }
    }

    /// Adds a user from a plaintext password.
    #[must_use]
    pub fn add_user_plaintext(&self, username: &str, password: &str) -> bool {
        self.add_user(username, &hash_password(password))
    }

    /// Removes a user.
    #[must_use]
    pub fn delete_user(&self, username: &str) -> bool {
        self.table()
            .is_some_and(|mut table| table.remove(username).is_some())
    }

    /// Replaces the password hash when `old_hash` matches the stored one.
    #[must_use]
    pub fn change_password(&self, username: &str, old_hash: &str, new_hash: &str) -> bool {
        self.with_user(username, |record| {
            if record.password_hash != old_hash {
                return false;
            }
            new_hash.clone_into(&mut record.password_hash);
            true
        })
        .unwrap_or(false)
    }

    /// Plaintext convenience wrapper around [`Auth::change_password`].
    #[must_use]
    pub fn change_password_plaintext(&self, username: &str, old: &str, new: &str) -> bool {
        self.change_password(username, &hash_password(old), &hash_password(new))
    }

    /// Overwrites the password hash without checking the old one.
    #[must_use]
    pub fn reset_password(&self, username: &str, new_hash: &str) -> bool {
        self.with_user(username, |record| {
            new_hash.clone_into(&mut record.password_hash);
        })
        .is_some()
    }

    /// Sets the privilege level of a user.
    #[must_use]
    pub fn set_privilege(&self, username: &str, privilege: i32) -> bool {
        self.with_user(username, |record| record.privilege = privilege)
            .is_some()
    }

    /// Whether the user is currently logged in.
    #[must_use]
    pub fn is_logged_in(&self, username: &str) -> Option<bool> {
        self.with_user(username, |record| record.logged_in)
    }

    /// Time of the user's last successful login.
    #[must_use]
    pub fn last_login(&self, username: &str) -> Option<Timestamp> {
        self.with_user(username, |record| record.last_login)
    }

    /// Time the user last logged out.
    #[must_use]
    pub fn last_seen(&self, username: &str) -> Option<Timestamp> {
        self.with_user(username, |record| record.last_seen)
    }

    /// Account creation time.
    #[must_use]
    pub fn creation(&self, username: &str) -> Option<Timestamp> {
        self.with_user(username, |record| record.creation)
    }

    /// Privilege level of the user.
    #[must_use]
    pub fn privilege(&self, username: &str) -> Option<i32> {
        self.with_user(username, |record| record.privilege)
    }

    /// Sorted list of account names.
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        self.table()
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of accounts.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.table().map_or(0, |table| table.len())
    }

    /// Copies every record, sorted by username.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserRecord> {
        self.table()
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Replaces the whole table with the records held by `store`.
    ///
    /// Returns the number of records loaded.
    pub fn load_users(&self, store: &dyn UserStore, resource: &Path) -> Result<usize, PersistError> {
        if self.role != Role::Server {
            return Err(PersistError::WrongRole);
        }
        let records = store.load(resource)?;
        let mut replacement = BTreeMap::new();
        for record in records {
            let username = record.username.clone();
            if replacement.insert(username.clone(), record).is_some() {
                return Err(PersistError::DuplicateUser {
                    path: resource.to_path_buf(),
                    username,
                });
            }
        }
        let count = replacement.len();
        if let Some(mut table) = self.table() {
            *table = replacement;
        }
        info!(target: AUTH_TARGET, resource = %resource.display(), count, "loaded user database");
        Ok(count)
    }

    /// Writes a snapshot of the table to `store`.
    pub fn save_users(&self, store: &dyn UserStore, resource: &Path) -> Result<(), PersistError> {
        if self.role != Role::Server {
            return Err(PersistError::WrongRole);
        }
        let records = self.snapshot();
        store.save(resource, &records)?;
        info!(
            target: AUTH_TARGET,
            resource = %resource.display(),
            count = records.len(),
            "saved user database"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::persist::MemoryStore;

    #[fixture]
    fn server() -> Auth {
        let auth = Auth::server();
        assert!(auth.add_user_plaintext("alice", "wonder"));
        auth
    }

    #[rstest]
    #[case("")]
    #[case("wonder")]
    #[case("a much longer passphrase with spaces")]
    fn client_response_matches_server_expectation(#[case] password: &str) {
        let server = Auth::server();
        assert!(server.add_user_plaintext("bob", password));
        let pack = server.challenge("bob").expect("challenge for known user");

        let response = Auth::client()
            .challenge_response(&pack.session, password)
            .expect("client computes response");

        assert_eq!(response, pack.expected_response);
        assert!(server.authenticate("bob", &pack, &response));
        assert_eq!(server.is_logged_in("bob"), Some(true));
    }

    #[rstest]
    fn wrong_password_is_rejected(server: Auth) {
        let pack = server.challenge("alice").expect("challenge");
        let response = Auth::client()
            .challenge_response(&pack.session, "blunder")
            .expect("response");
        assert!(!server.authenticate("alice", &pack, &response));
        assert_eq!(server.is_logged_in("alice"), Some(false));
        assert!(server.last_login("alice").expect("known user").is_never());
    }

    #[rstest]
    fn challenges_never_reuse_sessions(server: Auth) {
        let first = server.challenge("alice").expect("first challenge");
        let second = server.challenge("alice").expect("second challenge");
        assert_ne!(first.session, second.session);
        assert_ne!(first.expected_response, second.expected_response);
    }

    #[rstest]
    fn captured_response_does_not_replay(server: Auth) {
        let first = server.challenge("alice").expect("first challenge");
        let captured = Auth::client()
            .challenge_response(&first.session, "wonder")
            .expect("response");
        let second = server.challenge("alice").expect("second challenge");
        assert!(!server.authenticate("alice", &second, &captured));
    }

    #[rstest]
    fn pack_for_other_user_is_rejected(server: Auth) {
        assert!(server.add_user_plaintext("mallory", "wonder"));
        let pack = server.challenge("mallory").expect("challenge");
        let response = Auth::client()
            .challenge_response(&pack.session, "wonder")
            .expect("response");
        assert!(!server.authenticate("alice", &pack, &response));
    }

    #[rstest]
    fn unknown_user_gets_no_challenge(server: Auth) {
        assert!(server.challenge("nobody").is_none());
    }

    #[test]
    fn roles_are_enforced() {
        let client = Auth::client();
        assert!(!client.add_user_plaintext("alice", "wonder"));
        assert!(client.challenge("alice").is_none());
        assert!(client.privilege("alice").is_none());
        assert!(client.usernames().is_empty());

        let server = Auth::server();
        assert!(server.challenge_response("session", "wonder").is_none());
    }

    #[rstest]
    fn add_user_rejects_duplicates(server: Auth) {
        assert!(!server.add_user_plaintext("alice", "other"));
        assert_eq!(server.user_count(), 1);
    }

    #[rstest]
    fn operations_on_absent_user_fail(server: Auth) {
        assert!(!server.delete_user("nobody"));
        assert!(!server.set_privilege("nobody", -1));
        assert!(!server.change_password_plaintext("nobody", "a", "b"));
        assert!(!server.reset_password("nobody", "hash"));
        assert!(!server.logout("nobody"));
        assert!(server.creation("nobody").is_none());
    }

    #[rstest]
    fn delete_removes_user(server: Auth) {
        assert!(server.delete_user("alice"));
        assert!(!server.delete_user("alice"));
        assert_eq!(server.user_count(), 0);
    }

    #[rstest]
    fn change_password_requires_old_hash(server: Auth) {
        assert!(!server.change_password_plaintext("alice", "wrong", "new"));
        assert!(server.change_password_plaintext("alice", "wonder", "new"));

        let pack = server.challenge("alice").expect("challenge");
        let response = Auth::client()
            .challenge_response(&pack.session, "new")
            .expect("response");
        assert!(server.authenticate("alice", &pack, &response));
    }

    #[rstest]
    fn log_on_refuses_a_second_session(server: Auth) {
        let first = server.challenge("alice").expect("first challenge");
        let second = server.challenge("alice").expect("second challenge");
        let client = Auth::client();
        let respond = |pack: &ChallengePack| {
            client
                .challenge_response(&pack.session, "wonder")
                .expect("response")
        };

        assert_eq!(
            server.log_on("alice", &first, &respond(&first)),
            LoginOutcome::Accepted
        );
        let stamped = server.last_login("alice").expect("known user");
        assert_eq!(
            server.log_on("alice", &second, &respond(&second)),
            LoginOutcome::AlreadyLoggedOn
        );
        assert_eq!(server.last_login("alice"), Some(stamped));

        assert!(server.logout("alice"));
        let third = server.challenge("alice").expect("third challenge");
        assert_eq!(
            server.log_on("alice", &third, &respond(&third)),
            LoginOutcome::Accepted
        );
    }

    #[rstest]
    fn log_on_checks_the_response_first(server: Auth) {
        assert!(server.force_authenticate("alice"));
        let pack = server.challenge("alice").expect("challenge");
        assert_eq!(server.log_on("alice", &pack, "forged"), LoginOutcome::Rejected);
        assert_eq!(
            Auth::client().log_on("alice", &pack, &pack.expected_response),
            LoginOutcome::Rejected
        );
    }

    #[test]
    fn racing_log_ons_admit_exactly_one() {
        let server = Auth::server();
        assert!(server.add_user_plaintext("alice", "wonder"));
        let packs: Vec<ChallengePack> = (0..8)
            .map(|_| server.challenge("alice").expect("challenge"))
            .collect();
        let barrier = std::sync::Barrier::new(packs.len());

        let outcomes: Vec<LoginOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = packs
                .iter()
                .map(|pack| {
                    let (server, barrier) = (&server, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        server.log_on("alice", pack, &pack.expected_response)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("login thread"))
                .collect()
        });

        let accepted = outcomes
            .iter()
            .filter(|outcome| **outcome == LoginOutcome::Accepted)
            .count();
        assert_eq!(accepted, 1, "{outcomes:?}");
        assert_eq!(
            outcomes.len() - accepted,
            outcomes
                .iter()
                .filter(|outcome| **outcome == LoginOutcome::AlreadyLoggedOn)
                .count()
        );
    }

    #[rstest]
    fn logout_requires_login_and_stamps_last_seen(server: Auth) {
        assert!(!server.logout("alice"));
        assert!(server.force_authenticate("alice"));
        assert!(server.logout("alice"));
        assert!(!server.last_seen("alice").expect("known user").is_never());
        assert_eq!(server.is_logged_in("alice"), Some(false));
    }

    #[rstest]
    fn logout_all_reports_logged_in_users(server: Auth) {
        assert!(server.add_user_plaintext("bob", "builder"));
        assert!(server.force_authenticate("bob"));
        assert_eq!(server.logout_all(), vec!["bob".to_owned()]);
        assert_eq!(server.is_logged_in("bob"), Some(false));
        assert!(server.logout_all().is_empty());
    }

    #[rstest]
    fn privilege_defaults_to_zero_and_can_change(server: Auth) {
        assert_eq!(server.privilege("alice"), Some(0));
        assert!(server.set_privilege("alice", -2));
        assert_eq!(server.privilege("alice"), Some(-2));
    }

    #[rstest]
    fn save_then_load_replaces_table(server: Auth) {
        let store = MemoryStore::new();
        let path = Path::new("users");
        assert!(server.force_authenticate("alice"));
        server.save_users(&store, path).expect("save");

        let restored = Auth::server();
        assert!(restored.add_user_plaintext("stale", "entry"));
        let count = restored.load_users(&store, path).expect("load");

        assert_eq!(count, 1);
        assert_eq!(restored.usernames(), vec!["alice".to_owned()]);
        assert_eq!(restored.is_logged_in("alice"), Some(false));
    }

    #[test]
    fn load_rejects_duplicate_usernames() {
        let store = MemoryStore::new();
        let path = Path::new("dupes");
        let record = UserRecord::new("alice", hash_password("wonder"));
        store
            .save(path, &[record.clone(), record])
            .expect("seed store");

        let auth = Auth::server();
        assert!(matches!(
            auth.load_users(&store, path),
            Err(PersistError::DuplicateUser { .. })
        ));
    }

    #[test]
    fn client_cannot_persist() {
        let store = MemoryStore::new();
        let client = Auth::client();
        assert!(matches!(
            client.save_users(&store, Path::new("x")),
            Err(PersistError::WrongRole)
        ));
    }
}
