//! Commands the server itself implements.

use tracing::info;

use super::DISPATCH_TARGET;
use super::command::{CommandLine, INTERNAL_MARKER};
use super::extension::{CommandContext, CommandOutcome};
use super::messages;
use super::session::Dispatcher;

/// Privilege needed for `BROADCAST` and a restricted `USERS`.
pub const OPERATOR_PRIVILEGE: i32 = -1;

/// Privilege needed for `DOWN`.
pub const ADMIN_PRIVILEGE: i32 = -2;

const HELP_LINES: &[(&str, &str)] = &[
    ("EXIT", "log out and disconnect"),
    ("WHOAMI", "show this connection's identity"),
    ("HELP", "show this text"),
    ("USERS", "list accounts"),
    ("BROADCAST <message>", "send a message to every other connection"),
    ("DOWN", "shut the server down"),
];

pub(super) fn run(
    dispatcher: &Dispatcher,
    context: &mut CommandContext<'_>,
    command: &CommandLine,
) -> CommandOutcome {
    match command.name.as_str() {
        "EXIT" => return CommandOutcome::Disconnect,
        "WHOAMI" => whoami(dispatcher, context),
        "HELP" => help(dispatcher, context),
        "USERS" => {
            let allowed = !dispatcher.settings().restrict_user_list
                || permitted(dispatcher, context, OPERATOR_PRIVILEGE);
            if allowed {
                users(dispatcher, context);
            } else {
                context.reply(&messages::no_privilege(&command.name));
            }
        }
        "BROADCAST" => {
            if permitted(dispatcher, context, OPERATOR_PRIVILEGE) {
                broadcast(dispatcher, context, &command.args.join(" "));
            } else {
                context.reply(&messages::no_privilege(&command.name));
            }
        }
        "DOWN" => {
            if permitted(dispatcher, context, ADMIN_PRIVILEGE) {
                down(dispatcher, context);
            } else {
                context.reply(&messages::no_privilege(&command.name));
            }
        }
        other => context.reply(&messages::internal_not_recognized(other)),
    }
    CommandOutcome::Continue
}

/// Privilege checks only apply when the policy requires a login.
fn permitted(dispatcher: &Dispatcher, context: &CommandContext<'_>, required: i32) -> bool {
    !dispatcher.settings().policy.requires_login()
        || context.privilege().is_some_and(|privilege| privilege <= required)
}

fn sender_name(context: &CommandContext<'_>) -> String {
    context
        .username()
        .map_or_else(|| context.record().peer().to_owned(), str::to_owned)
}

fn whoami(dispatcher: &Dispatcher, context: &mut CommandContext<'_>) {
    let record = context.record();
    let mut lines = vec![format!(
        "connection {} from {}, connected {}",
        record.id(),
        record.peer(),
        record.connected_at()
    )];
    match context.username() {
        Some(username) => {
            let auth = dispatcher.auth();
            lines.push(format!(
                "user {username}, privilege {}",
                context.privilege().unwrap_or_default()
            ));
            if let Some(last_login) = auth.last_login(username) {
                lines.push(format!("last login {last_login}"));
            }
            if let Some(creation) = auth.creation(username) {
                lines.push(format!("account created {creation}"));
            }
        }
        None => lines.push("not logged on".to_owned()),
    }
    context.reply_lines(lines);
}

fn help(dispatcher: &Dispatcher, context: &mut CommandContext<'_>) {
    let mut lines: Vec<String> = vec!["internal commands:".to_owned()];
    lines.extend(
        HELP_LINES
            .iter()
            .map(|(usage, summary)| format!("  {INTERNAL_MARKER}{usage:<22}{summary}")),
    );
    let extra = dispatcher.extension().help();
    if !extra.is_empty() {
        lines.push("service commands:".to_owned());
        lines.extend(extra.into_iter().map(|line| format!("  {line}")));
    }
    context.reply_lines(lines);
}

fn users(dispatcher: &Dispatcher, context: &mut CommandContext<'_>) {
    let auth = dispatcher.auth();
    let names = auth.usernames();
    let mut lines: Vec<String> = names
        .iter()
        .map(|name| {
            let privilege = auth.privilege(name).unwrap_or_default();
            let state = if auth.is_logged_in(name) == Some(true) {
                "logged on"
            } else {
                "offline"
            };
            format!("{name:<16} {privilege:>5}  {state}")
        })
        .collect();
    lines.push(format!("{} users.", names.len()));
    context.reply_lines(lines);
}

/// Sends the header and body to every other connection in a stable state.
///
/// Each target's output lock is held across both lines so concurrent
/// broadcasts never interleave at a single recipient.
fn broadcast(dispatcher: &Dispatcher, context: &mut CommandContext<'_>, body: &str) {
    let header = messages::broadcast_header(&sender_name(context));
    let origin = context.connection();
    let mut delivered = 0_usize;
    for target in dispatcher.registry().all() {
        if target.id() == origin || !target.session().auth.is_stable() {
            continue;
        }
        let mut output = target.output();
        output.push_line(&header);
        output.push_line(body);
        delivered += 1;
    }
    info!(
        target: DISPATCH_TARGET,
        connection = %origin,
        delivered,
        "broadcast sent"
    );
    context.reply(&format!("[broadcast delivered to {delivered} connection(s)]"));
}

fn down(dispatcher: &Dispatcher, context: &mut CommandContext<'_>) {
    let sender = sender_name(context);
    context.reply("[shutdown requested]");
    dispatcher.shutdown().fire(format!("DOWN command from {sender}"));
}
