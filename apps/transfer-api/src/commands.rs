//! Line-oriented administration commands.
//!
//! Console commands come from stdin; chat commands come from users talking
//! to the bot with a `!` prefix. Both produce plain output lines.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use transfer_common::now_millis;

use crate::auth::tokens::TokenError;
use crate::gateway::protocol::{encode_token_reply, TOKEN_MIN_VERSION};
use crate::gateway::session::AWAITING_REPLY;
use crate::AppState;

/// Marks a chat line as a command.
pub const CHAT_COMMAND_PREFIX: char = '!';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Empty,
    Unknown(String),
    NotEnoughParameters { have: usize, need: usize },
    InvalidArgument(&'static str),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Empty => Ok(()),
            CommandError::Unknown(name) => write!(f, "Command no exist! ({name})"),
            CommandError::NotEnoughParameters { have, need } => {
                write!(f, "Not enough parameters. ({have}/{need})")
            }
            CommandError::InvalidArgument(msg) => f.write_str(msg),
        }
    }
}

/// Split a line into a command name and its arguments, checking the
/// argument count against `min_args(name)`.
fn split_line<'a>(
    line: &'a str,
    min_args: impl Fn(&str) -> Option<usize>,
) -> Result<(&'a str, Vec<&'a str>), CommandError> {
    let mut words = line.split_whitespace();
    let name = words.next().ok_or(CommandError::Empty)?;
    let args: Vec<&str> = words.collect();
    let need = min_args(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
    if args.len() < need {
        return Err(CommandError::NotEnoughParameters {
            have: args.len(),
            need,
        });
    }
    Ok((name, args))
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Online,
    ToIrc { username: String, message: String },
    ToSync { username: String, message: String },
    Kick { username: String },
    Ban { username: String, minutes: u64 },
    Unban { username: String },
    Quit,
}

/// `(name, usage, description, min args)`
const CONSOLE_HELP: [(&str, &str, &str, usize); 8] = [
    ("help", "", "Show this list", 0),
    ("online", "", "All online users", 0),
    ("toirc", "[username] [msg]", "Send a message to IRC", 2),
    ("tosync", "[username] [msg]", "Send a notice to Sync", 2),
    ("kick", "[username]", "Let a user go offline", 1),
    ("ban", "[username] [minutes]", "Ban a user", 2),
    ("unban", "[username]", "Unban a user", 1),
    ("quit", "", "Quit server", 0),
];

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let (name, args) = split_line(line, |name| {
            CONSOLE_HELP
                .iter()
                .find(|(n, ..)| *n == name)
                .map(|(.., min)| *min)
        })?;
        let username = || args[0].to_string();
        let rest = || args[1..].join(" ");

        Ok(match name {
            "help" => ConsoleCommand::Help,
            "online" => ConsoleCommand::Online,
            "toirc" => ConsoleCommand::ToIrc {
                username: username(),
                message: rest(),
            },
            "tosync" => ConsoleCommand::ToSync {
                username: username(),
                message: rest(),
            },
            "kick" => ConsoleCommand::Kick {
                username: username(),
            },
            "ban" => ConsoleCommand::Ban {
                username: username(),
                minutes: parse_ban_minutes(args[1])?,
            },
            "unban" => ConsoleCommand::Unban {
                username: username(),
            },
            "quit" => ConsoleCommand::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        })
    }
}

/// Minutes must be a whole number whose length in milliseconds fits the
/// stored ban duration.
fn parse_ban_minutes(arg: &str) -> Result<u64, CommandError> {
    let invalid = CommandError::InvalidArgument("minutes format is incorrect.");
    let minutes: u64 = arg.parse().map_err(|_| invalid.clone())?;
    minutes
        .checked_mul(60_000)
        .filter(|&ms| i64::try_from(ms).is_ok())
        .ok_or(invalid)?;
    Ok(minutes)
}

pub async fn run_console(state: &AppState, cmd: ConsoleCommand) -> Vec<String> {
    match cmd {
        ConsoleCommand::Help => CONSOLE_HELP
            .iter()
            .map(|(name, usage, about, _)| format!("{name} {usage}\t{about}"))
            .collect(),

        ConsoleCommand::Online => {
            let users = state.sessions.online_users().await;
            vec![users.join("\t"), format!("Count: {}", users.len())]
        }

        ConsoleCommand::ToIrc { username, message } => {
            let Some(session) = state.sessions.lookup(&username).await else {
                return vec![format!("{username} is offline.")];
            };
            tracing::info!(username = %session.username, "[WS -> IRC] {message}");
            state.chat.send_message(&session.username, &message).await;
            Vec::new()
        }

        ConsoleCommand::ToSync { username, message } => {
            let Some(session) = state.sessions.lookup(&username).await else {
                return vec![format!("{username} is offline.")];
            };
            session.send_notice(&message).await;
            Vec::new()
        }

        ConsoleCommand::Kick { username } => {
            match state
                .sessions
                .kick(&username, "You are taken offline by the administrator.")
                .await
            {
                Ok(true) => vec![format!("{username} was kicked.")],
                Ok(false) => vec![format!("{username} is offline.")],
                Err(err) => vec![err.to_string()],
            }
        }

        ConsoleCommand::Ban { username, minutes } => {
            let duration = Duration::from_secs(minutes.saturating_mul(60));
            let now = now_millis();
            let mut user = match state.users.get_by_name(&username).await {
                Ok(Some(user)) => user,
                Ok(None) => return vec![format!("User({username}) does not exist.")],
                Err(err) => return vec![format!("User store error: {err}")],
            };
            user.ban(duration, now);
            // Keep a live session's copy in step so a later rating update
            // cannot persist a stale unbanned record.
            if let Some(session) = state.sessions.lookup(&username).await {
                session.update_user(|u| u.ban(duration, now));
            }
            let _ = state
                .sessions
                .kick(&username, "You are banned by the administrator.")
                .await;
            if let Err(err) = state.users.upsert(&user).await {
                tracing::error!(%username, ?err, "failed to persist ban");
                return vec![format!("User store error: {err}")];
            }
            vec![format!("{} is banned for {minutes} minutes.", user.username)]
        }

        ConsoleCommand::Unban { username } => {
            let mut user = match state.users.get_by_name(&username).await {
                Ok(Some(user)) => user,
                Ok(None) => return vec![format!("User({username}) does not exist.")],
                Err(err) => return vec![format!("User store error: {err}")],
            };
            user.unban();
            if let Some(session) = state.sessions.lookup(&username).await {
                session.update_user(|u| u.unban());
            }
            if let Err(err) = state.users.upsert(&user).await {
                tracing::error!(%username, ?err, "failed to persist unban");
                return vec![format!("User store error: {err}")];
            }
            vec![format!("{} is unbanned.", user.username)]
        }

        ConsoleCommand::Quit => {
            state.shutdown.notify_one();
            vec!["Shutting down...".to_string()]
        }
    }
}

/// Parse and run one console line.
pub async fn dispatch_console(state: &AppState, line: &str) -> Vec<String> {
    match ConsoleCommand::parse(line) {
        Ok(cmd) => run_console(state, cmd).await,
        Err(CommandError::Empty) => Vec::new(),
        Err(err) => vec![err.to_string()],
    }
}

/// Read console commands from stdin until EOF or `quit`.
pub async fn run_stdin(state: AppState) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%err, "console read failed");
                break;
            }
        };
        let quit = matches!(ConsoleCommand::parse(&line), Ok(ConsoleCommand::Quit));
        for out in dispatch_console(&state, &line).await {
            println!("{out}");
        }
        if quit {
            break;
        }
    }
    tracing::debug!("console closed");
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Logout,
    AssignToken,
}

impl ChatCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let (name, _) = split_line(line, |name| match name {
            "logout" | "assign_token" => Some(0),
            _ => None,
        })?;
        Ok(match name {
            "logout" => ChatCommand::Logout,
            _ => ChatCommand::AssignToken,
        })
    }
}

/// Run a chat command on behalf of `from`; the returned lines are sent back
/// to them.
pub async fn run_chat(state: &AppState, from: &str, cmd: ChatCommand) -> Vec<String> {
    match cmd {
        ChatCommand::Logout => {
            let reason = format!("You are taken offline by {from}.");
            match state.sessions.kick(from, &reason).await {
                Ok(_) => Vec::new(),
                Err(err) => vec![err.to_string()],
            }
        }

        ChatCommand::AssignToken => {
            let Some(session) = state.sessions.lookup(from).await else {
                return vec!["Your Sync is offline.".to_string()];
            };
            session.clear_flag(AWAITING_REPLY);

            if session.version < TOKEN_MIN_VERSION {
                return vec![format!(
                    "The PublicOsuBotTransfer plugin that is lower than the {TOKEN_MIN_VERSION} version does not support this command."
                )];
            }

            match state.tokens.request_token(&session.session_id).await {
                Ok(token) => {
                    tracing::info!(username = %session.username, "[Generate Token] {token}");
                    session.send_binary(encode_token_reply(&token)).await;
                    Vec::new()
                }
                Err(TokenError::AlreadyIssued) => {
                    vec!["You have already assigned a token.".to_string()]
                }
                Err(err) => vec![err.to_string()],
            }
        }
    }
}

/// Parse and run a chat line with its `!` prefix already removed.
pub async fn dispatch_chat(state: &AppState, from: &str, line: &str) -> Vec<String> {
    match ChatCommand::parse(line) {
        Ok(cmd) => run_chat(state, from, cmd).await,
        Err(CommandError::Empty) => Vec::new(),
        Err(err) => vec![err.to_string()],
    }
}
