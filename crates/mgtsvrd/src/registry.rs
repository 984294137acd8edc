//! Connection registry and per-connection records.
//!
//! The multiplexer is the only writer of registry membership. Workers look a
//! record up, clone its `Arc`, and release the registry lock before touching
//! the record's own session or output locks.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mgtsvr_auth::{ChallengePack, Timestamp};

use crate::channel::FramedChannel;

/// Identifies one accepted connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Login progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No login in progress or required.
    #[default]
    NoAuth,
    /// Waiting for the client to send its username.
    AwaitUsername,
    /// Waiting for a plaintext password.
    AwaitPassword,
    /// Waiting for the response to a session challenge.
    AwaitChallenge,
    /// Authenticated.
    LoggedOn,
    /// A close has been scheduled; further lines are ignored.
    Disconnecting,
}

impl AuthState {
    /// Whether the state persists across commands.
    #[must_use]
    pub fn is_stable(self) -> bool {
        matches!(self, Self::NoAuth | Self::LoggedOn)
    }
}

/// Authentication fields guarded by the per-connection session lock.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Current login progress.
    pub auth: AuthState,
    /// Username supplied at the username prompt, kept once logged on.
    pub username: Option<String>,
    /// Challenge issued for the current login attempt.
    pub pending: Option<ChallengePack>,
}

/// Callbacks from connection records back into the event loop.
pub trait OutputNotifier: Send + Sync {
    /// Output was queued for `id` and should be flushed.
    fn output_ready(&self, id: ConnectionId);

    /// `id` should be closed once `delay` has elapsed.
    fn close_requested(&self, id: ConnectionId, delay: Duration);
}

/// State shared between the multiplexer and the workers for one connection.
pub struct ConnectionRecord {
    id: ConnectionId,
    peer: String,
    connected_at: Timestamp,
    session: Mutex<SessionState>,
    output: Mutex<FramedChannel>,
    notifier: Arc<dyn OutputNotifier>,
}

impl fmt::Debug for ConnectionRecord {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

impl ConnectionRecord {
    pub(crate) fn new(
        id: ConnectionId,
        peer: impl Into<String>,
        notifier: Arc<dyn OutputNotifier>,
    ) -> Self {
        Self {
            id,
            peer: peer.into(),
            connected_at: Timestamp::now(),
            session: Mutex::new(SessionState::default()),
            output: Mutex::new(FramedChannel::new()),
            notifier,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Printable peer address.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Accept time.
    #[must_use]
    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    /// Locks the session fields.
    pub fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the outbound channel for a multi-line write.
    ///
    /// The event loop is woken when the guard drops with bytes pending, so
    /// every line written under one guard reaches the peer contiguously.
    pub fn output(&self) -> OutputGuard<'_> {
        OutputGuard {
            channel: self.output.lock().unwrap_or_else(PoisonError::into_inner),
            record: self,
        }
    }

    /// Queues a single line.
    pub fn send_line(&self, text: &str) {
        self.output().push_line(text);
    }

    /// Asks the event loop to close this connection after `delay`.
    pub fn request_close(&self, delay: Duration) {
        self.notifier.close_requested(self.id, delay);
    }

    /// Outbound channel access for the event loop itself, which must not
    /// wake itself.
    pub(crate) fn outbound(&self) -> MutexGuard<'_, FramedChannel> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive access to a connection's outbound channel.
pub struct OutputGuard<'a> {
    channel: MutexGuard<'a, FramedChannel>,
    record: &'a ConnectionRecord,
}

impl Deref for OutputGuard<'_> {
    type Target = FramedChannel;

    fn deref(&self) -> &Self::Target {
        &self.channel
    }
}

impl DerefMut for OutputGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.channel
    }
}

impl Drop for OutputGuard<'_> {
    fn drop(&mut self) {
        if !self.channel.is_empty() {
            self.record.notifier.output_ready(self.record.id);
        }
    }
}

/// Map of live connections.
#[derive(Debug, Default)]
pub struct Registry {
    records: Mutex<HashMap<ConnectionId, Arc<ConnectionRecord>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<ConnectionRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, record: Arc<ConnectionRecord>) {
        self.records().insert(record.id(), record);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.records().remove(&id)
    }

    /// Looks up a live connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.records().get(&id).cloned()
    }

    /// Snapshot of every live connection, ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ConnectionRecord>> {
        let mut records: Vec<_> = self.records().values().cloned().collect();
        records.sort_by_key(|record| record.id());
        records
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Whether no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::test_support::{RecordingNotifier, record, sent_lines};
    use super::*;

    #[test]
    fn output_guard_notifies_once_per_write_block() {
        let notifier = Arc::new(RecordingNotifier::default());
        let connection = record(3, &notifier);
        {
            let mut output = connection.output();
            output.push_line("first");
            output.push_line("second");
        }
        connection.send_line("third");

        let ready = notifier.ready.lock().expect("ready list").clone();
        assert_eq!(ready, vec![ConnectionId(3), ConnectionId(3)]);
        assert_eq!(sent_lines(&connection), vec!["first", "second", "third"]);
    }

    #[test]
    fn empty_guard_does_not_notify() {
        let notifier = Arc::new(RecordingNotifier::default());
        let connection = record(1, &notifier);
        drop(connection.output());
        assert!(notifier.ready.lock().expect("ready list").is_empty());
    }

    #[test]
    fn close_request_carries_delay() {
        let notifier = Arc::new(RecordingNotifier::default());
        let connection = record(9, &notifier);
        connection.request_close(Duration::from_millis(250));
        assert_eq!(
            notifier.closes(),
            vec![(ConnectionId(9), Duration::from_millis(250))]
        );
    }

    #[test]
    fn registry_tracks_membership() {
        let notifier = Arc::new(RecordingNotifier::default());
        let registry = Registry::new();
        registry.insert(record(2, &notifier));
        registry.insert(record(1, &notifier));

        let ids: Vec<_> = registry.all().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![ConnectionId(1), ConnectionId(2)]);
        assert!(registry.get(ConnectionId(2)).is_some());

        assert!(registry.remove(ConnectionId(2)).is_some());
        assert!(registry.get(ConnectionId(2)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn only_rest_states_are_stable() {
        assert!(AuthState::NoAuth.is_stable());
        assert!(AuthState::LoggedOn.is_stable());
        assert!(!AuthState::AwaitUsername.is_stable());
        assert!(!AuthState::Disconnecting.is_stable());
    }
}
