//! Chat-network side of the bridge.

pub mod bridge;
pub mod client;

use async_trait::async_trait;

pub use client::IrcClient;

/// Outbound half of the chat network as seen by sessions and commands.
#[async_trait]
pub trait ChatNetwork: Send + Sync {
    /// Send `text` as a private message to `target`. Delivery is best-effort;
    /// lines queued while the connection is down may be lost.
    async fn send_message(&self, target: &str, text: &str);

    /// Whether `nick` has been seen on the network since the last reconnect.
    fn is_online(&self, nick: &str) -> bool;
}

/// Something a user said to the bot.
#[derive(Debug, Clone, PartialEq)]
pub enum IrcEvent {
    Message { from: String, text: String },
}

/// Chat-network nicks never contain spaces.
pub fn to_nick(username: &str) -> String {
    username.replace(' ', "_")
}

/// One parsed protocol line: `[:prefix] COMMAND params... [:trailing]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IrcLine {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcLine {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (prefix, rest) = match line.strip_prefix(':') {
            Some(rest) => {
                let (prefix, rest) = rest.split_once(' ')?;
                (Some(prefix.to_string()), rest)
            }
            None => (None, line),
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(IrcLine {
            prefix,
            command,
            params,
        })
    }

    /// Nick part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split(['!', '@']).next().unwrap_or(prefix))
    }
}
