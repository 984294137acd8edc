//! Service-specific command hook.

use crate::registry::{ConnectionId, ConnectionRecord};

/// What the dispatcher does after a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Keep the connection; re-issue the prompt if enabled.
    Continue,
    /// Log the user out and close the connection.
    Disconnect,
}

/// Caller identity and reply channel for one command.
pub struct CommandContext<'a> {
    record: &'a ConnectionRecord,
    username: Option<&'a str>,
    privilege: Option<i32>,
}

impl<'a> CommandContext<'a> {
    pub(crate) fn new(
        record: &'a ConnectionRecord,
        username: Option<&'a str>,
        privilege: Option<i32>,
    ) -> Self {
        Self {
            record,
            username,
            privilege,
        }
    }

    pub(crate) fn record(&self) -> &'a ConnectionRecord {
        self.record
    }

    /// Connection the command arrived on.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.record.id()
    }

    /// Logged-on user; `None` for anonymous sessions.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username
    }

    /// Privilege of the logged-on user.
    #[must_use]
    pub fn privilege(&self) -> Option<i32> {
        self.privilege
    }

    /// Sends one line to the caller.
    pub fn reply(&mut self, line: &str) {
        self.record.send_line(line);
    }

    /// Sends several lines that reach the caller contiguously.
    pub fn reply_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut output = self.record.output();
        for line in lines {
            output.push_line(line.as_ref());
        }
    }
}

/// Handler for commands without the internal marker.
///
/// Runs on a worker thread with no locks held. Implementations reply through
/// the context only.
pub trait CommandExtension: Send + Sync {
    /// Executes `command`, whose first element is the upper-cased name.
    fn external_command(
        &self,
        context: &mut CommandContext<'_>,
        command: &[String],
    ) -> CommandOutcome;

    /// Extra lines for the `HELP` listing.
    fn help(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Extension that recognizes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtension;

impl CommandExtension for NoExtension {
    fn external_command(
        &self,
        context: &mut CommandContext<'_>,
        command: &[String],
    ) -> CommandOutcome {
        let name = command.first().map_or("", String::as_str);
        context.reply(&super::messages::command_not_recognized(name));
        CommandOutcome::Continue
    }
}
