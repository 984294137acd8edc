//! Text the dispatcher sends to clients.

pub(crate) const USERNAME_PROMPT: &str = "username: ";
pub(crate) const PASSWORD_PROMPT: &str = "password: ";
pub(crate) const UNABLE_TO_AUTHENTICATE: &str = "[unable to authenticate]";
pub(crate) const DISCONNECTING: &str = "disconnecting...";
pub(crate) const SHUTTING_DOWN: &str = "[server is shutting down]";
pub(crate) const LINE_TOO_LONG: &str = "[line too long]";
pub(crate) const SERVER_BUSY: &str = "[server busy, command dropped]";
pub(crate) const NOT_LOGGED_ON: &str = "[you are not logged on]";
pub(crate) const GOODBYE: &str = "goodbye.";

pub(crate) fn session_prompt(session: &str) -> String {
    format!("session: {session}")
}

pub(crate) fn logged_on_as(username: &str) -> String {
    format!("[logged on as {username}]")
}

pub(crate) fn already_logged_on(username: &str) -> String {
    format!("[user {username} is already logged on]")
}

pub(crate) fn internal_not_recognized(name: &str) -> String {
    format!("[internal command {name} not recognized]")
}

/// Reply for an external command no extension recognizes.
#[must_use]
pub fn command_not_recognized(name: &str) -> String {
    format!("[command {name} not recognized]")
}

pub(crate) fn no_privilege(name: &str) -> String {
    format!("[you do not have privileges to execute the command {name}]")
}

pub(crate) fn broadcast_header(sender: &str) -> String {
    format!("[broadcast message from user: {sender}]")
}
