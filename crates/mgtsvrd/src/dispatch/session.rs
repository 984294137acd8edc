//! Per-connection login state machine and command execution.
//!
//! Every work item re-reads the connection's session state under its session
//! lock, because two items from the same connection may be in flight on
//! different workers. Login steps hold that lock for the whole transition;
//! command execution releases it before running the command so broadcasts
//! never wait on a session lock while holding another connection's locks.

use std::sync::Arc;
use std::time::Duration;

use mgtsvr_auth::{Auth, ChallengePack, LoginOutcome};
use mgtsvr_config::AuthPolicy;
use tracing::{debug, info, warn};

use super::builtin;
use super::command::CommandLine;
use super::errors::DispatchError;
use super::extension::{CommandContext, CommandExtension, CommandOutcome};
use super::messages;
use super::DISPATCH_TARGET;
use crate::queue::WorkItem;
use crate::registry::{AuthState, ConnectionRecord, Registry, SessionState};
use crate::shutdown::ShutdownTrigger;

/// Behaviour knobs taken from the configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Login policy.
    pub policy: AuthPolicy,
    /// Text re-issued after each command; `None` disables prompting.
    pub prompt: Option<String>,
    /// Restricts `USERS` to elevated users when logins are required.
    pub restrict_user_list: bool,
    /// Grace period between the last message and the close.
    pub disconnect_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            policy: AuthPolicy::Open,
            prompt: None,
            restrict_user_list: false,
            disconnect_delay: Duration::from_millis(250),
        }
    }
}

/// Banner texts, already read from disk.
#[derive(Debug, Clone, Default)]
pub struct Banners {
    /// Shown without login under the banner policy, or after a login.
    pub banner: Option<String>,
    /// Shown to every client on connect.
    pub logon_banner: Option<String>,
}

/// Processes work items against the shared server state.
pub struct Dispatcher {
    auth: Arc<Auth>,
    registry: Arc<Registry>,
    extension: Arc<dyn CommandExtension>,
    shutdown: ShutdownTrigger,
    settings: DispatchSettings,
    banners: Banners,
}

impl Dispatcher {
    /// Builds a dispatcher over the shared server state.
    #[must_use]
    pub fn new(
        auth: Arc<Auth>,
        registry: Arc<Registry>,
        extension: Arc<dyn CommandExtension>,
        shutdown: ShutdownTrigger,
        settings: DispatchSettings,
        banners: Banners,
    ) -> Self {
        Self {
            auth,
            registry,
            extension,
            shutdown,
            settings,
            banners,
        }
    }

    pub(super) fn auth(&self) -> &Auth {
        &self.auth
    }

    pub(super) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(super) fn extension(&self) -> &dyn CommandExtension {
        self.extension.as_ref()
    }

    pub(super) fn shutdown(&self) -> &ShutdownTrigger {
        &self.shutdown
    }

    pub(super) fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Sends the connect-time greeting and sets the initial auth state.
    pub fn greet(&self, record: &ConnectionRecord) {
        let mut session = record.session();
        let mut output = record.output();
        if let Some(text) = &self.banners.logon_banner {
            push_text(&mut output, text);
        }
        if self.settings.policy.requires_login() {
            session.auth = AuthState::AwaitUsername;
            output.push_line(messages::USERNAME_PROMPT);
            return;
        }
        session.auth = AuthState::NoAuth;
        if self.settings.policy == AuthPolicy::BannerOnly
            && let Some(text) = &self.banners.banner
        {
            push_text(&mut output, text);
        }
        if let Some(prompt) = &self.settings.prompt {
            output.push_line(prompt);
        }
    }

    /// Handles one line taken from the work queue.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownConnection`] when the connection was
    /// removed before the item was processed.
    pub fn handle(&self, item: &WorkItem) -> Result<(), DispatchError> {
        let connection = item.connection();
        let record = self
            .registry
            .get(connection)
            .ok_or(DispatchError::UnknownConnection { connection })?;
        let mut session = record.session();
        let state = session.auth;
        debug!(
            target: DISPATCH_TARGET,
            connection = %connection,
            ?state,
            "processing line"
        );
        match state {
            AuthState::Disconnecting => {}
            AuthState::AwaitUsername => self.on_username(&record, &mut session, item.line()),
            AuthState::AwaitPassword => self.on_password(&record, &mut session, item.line()),
            AuthState::AwaitChallenge => self.on_challenge(&record, &mut session, item.line()),
            AuthState::NoAuth if self.settings.policy.requires_login() => {
                warn!(
                    target: DISPATCH_TARGET,
                    connection = %connection,
                    "command from unauthenticated connection"
                );
                self.disconnect(
                    &record,
                    &mut session,
                    &[messages::NOT_LOGGED_ON, messages::DISCONNECTING],
                );
            }
            AuthState::NoAuth | AuthState::LoggedOn => {
                let username = session.username.clone();
                drop(session);
                self.execute(&record, username.as_deref(), item.line());
            }
        }
        Ok(())
    }

    fn on_username(&self, record: &ConnectionRecord, session: &mut SessionState, line: &str) {
        let username = line.trim().to_owned();
        if self.settings.policy == AuthPolicy::Plaintext {
            session.username = Some(username);
            session.auth = AuthState::AwaitPassword;
            record.send_line(messages::PASSWORD_PROMPT);
            return;
        }
        match self.auth.challenge(&username) {
            Some(pack) => {
                record.send_line(&messages::session_prompt(&pack.session));
                session.username = Some(username);
                session.pending = Some(pack);
                session.auth = AuthState::AwaitChallenge;
            }
            None => {
                info!(
                    target: DISPATCH_TARGET,
                    connection = %record.id(),
                    username = %username,
                    "login refused for unknown user"
                );
                self.refuse(record, session);
            }
        }
    }

    fn on_password(&self, record: &ConnectionRecord, session: &mut SessionState, line: &str) {
        let username = session.username.clone().unwrap_or_default();
        let Some(pack) = self.auth.challenge(&username) else {
            info!(
                target: DISPATCH_TARGET,
                connection = %record.id(),
                username = %username,
                "login refused for unknown user"
            );
            self.refuse(record, session);
            return;
        };
        let response = Auth::client()
            .challenge_response(&pack.session, line)
            .unwrap_or_default();
        self.verify(record, session, &pack, &response);
    }

    fn on_challenge(&self, record: &ConnectionRecord, session: &mut SessionState, line: &str) {
        match session.pending.take() {
            Some(pack) => self.verify(record, session, &pack, line.trim()),
            None => self.refuse(record, session),
        }
    }

    fn verify(
        &self,
        record: &ConnectionRecord,
        session: &mut SessionState,
        pack: &ChallengePack,
        response: &str,
    ) {
        let username = pack.username.as_str();
        match self.auth.log_on(username, pack, response) {
            LoginOutcome::Accepted => {}
            LoginOutcome::Rejected => {
                info!(
                    target: DISPATCH_TARGET,
                    connection = %record.id(),
                    username,
                    "authentication failed"
                );
                self.refuse(record, session);
                return;
            }
            LoginOutcome::AlreadyLoggedOn => {
                info!(
                    target: DISPATCH_TARGET,
                    connection = %record.id(),
                    username,
                    "duplicate login refused"
                );
                let refusal = messages::already_logged_on(username);
                self.disconnect(record, session, &[refusal.as_str(), messages::DISCONNECTING]);
                return;
            }
        }
        self.complete_login(record, session, username);
    }

    fn complete_login(&self, record: &ConnectionRecord, session: &mut SessionState, username: &str) {
        session.auth = AuthState::LoggedOn;
        session.username = Some(username.to_owned());
        session.pending = None;
        info!(
            target: DISPATCH_TARGET,
            connection = %record.id(),
            peer = record.peer(),
            username,
            "user logged on"
        );
        let mut output = record.output();
        output.push_line(&messages::logged_on_as(username));
        if let Some(text) = &self.banners.banner {
            push_text(&mut output, text);
        }
        if let Some(prompt) = &self.settings.prompt {
            output.push_line(prompt);
        }
    }

    fn refuse(&self, record: &ConnectionRecord, session: &mut SessionState) {
        self.disconnect(
            record,
            session,
            &[messages::UNABLE_TO_AUTHENTICATE, messages::DISCONNECTING],
        );
    }

    /// Logs the session out, sends `lines`, and schedules the close.
    fn disconnect(&self, record: &ConnectionRecord, session: &mut SessionState, lines: &[&str]) {
        self.logout_session(session);
        session.auth = AuthState::Disconnecting;
        session.pending = None;
        {
            let mut output = record.output();
            for line in lines {
                output.push_line(line);
            }
        }
        record.request_close(self.settings.disconnect_delay);
    }

    fn logout_session(&self, session: &SessionState) {
        if session.auth == AuthState::LoggedOn
            && let Some(username) = &session.username
            && self.auth.logout(username)
        {
            info!(target: DISPATCH_TARGET, username = %username, "user logged out");
        }
    }

    /// Answers an over-long line by closing the connection.
    pub fn reject_overflow(&self, record: &ConnectionRecord) {
        warn!(
            target: DISPATCH_TARGET,
            connection = %record.id(),
            "line exceeded maximum length"
        );
        let mut session = record.session();
        self.disconnect(
            record,
            &mut session,
            &[messages::LINE_TOO_LONG, messages::DISCONNECTING],
        );
    }

    /// Releases session resources after the connection has gone away.
    pub fn release(&self, record: &ConnectionRecord) {
        let mut session = record.session();
        self.logout_session(&session);
        session.auth = AuthState::Disconnecting;
        session.pending = None;
    }

    /// Sends the shutdown notice to every live connection.
    pub fn announce_shutdown(&self) {
        for record in self.registry.all() {
            record.send_line(messages::SHUTTING_DOWN);
        }
    }

    fn execute(&self, record: &ConnectionRecord, username: Option<&str>, line: &str) {
        let Some(command) = CommandLine::parse(line) else {
            self.reprompt(record);
            return;
        };
        let privilege = username.and_then(|name| self.auth.privilege(name));
        let mut context = CommandContext::new(record, username, privilege);
        let outcome = if command.internal {
            builtin::run(self, &mut context, &command)
        } else {
            self.extension
                .external_command(&mut context, &command.to_vector())
        };
        debug!(
            target: DISPATCH_TARGET,
            connection = %record.id(),
            command = %command.name,
            internal = command.internal,
            ?outcome,
            "command executed"
        );
        match outcome {
            CommandOutcome::Continue => self.reprompt(record),
            CommandOutcome::Disconnect => {
                let mut session = record.session();
                self.disconnect(record, &mut session, &[messages::GOODBYE]);
            }
        }
    }

    fn reprompt(&self, record: &ConnectionRecord) {
        let Some(prompt) = &self.settings.prompt else {
            return;
        };
        let session = record.session();
        if session.auth.is_stable() {
            record.send_line(prompt);
        }
    }
}

fn push_text(output: &mut crate::channel::FramedChannel, text: &str) {
    for line in text.lines() {
        output.push_line(line);
    }
}
