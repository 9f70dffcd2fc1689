//! Online session registry: at most one live session per username.
//!
//! The username → session map is owned by one actor task; registration,
//! removal, lookups and kicks are all messages on its queue.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::irc::to_nick;

use super::session::Session;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session registry has shut down")]
    ActorShutdown,
}

enum RegistryCommand {
    Register {
        session: Arc<Session>,
        reply: oneshot::Sender<()>,
    },
    Unregister {
        username: String,
        session_id: String,
    },
    Lookup {
        username: String,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    Online {
        reply: oneshot::Sender<Vec<String>>,
    },
    Kick {
        username: String,
        reason: String,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable handle to the registry actor.
#[derive(Clone)]
pub struct SessionRegistry {
    tx: mpsc::Sender<RegistryCommand>,
}

/// Registry key: case-insensitive, and a display name with spaces matches
/// its chat-network nick.
fn key(username: &str) -> String {
    to_nick(username).to_lowercase()
}

impl SessionRegistry {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Insert `session` under its username, replacing any stale entry.
    /// Returns once the entry is visible to lookups.
    pub async fn register(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Register { session, reply })
            .await
            .map_err(|_| RegistryError::ActorShutdown)?;
        rx.await.map_err(|_| RegistryError::ActorShutdown)
    }

    /// Remove the entry for `session`, but only while it still points at
    /// this exact session. A newer session of the same user is left alone.
    pub async fn unregister(&self, session: &Session) {
        let _ = self
            .tx
            .send(RegistryCommand::Unregister {
                username: session.username.clone(),
                session_id: session.session_id.clone(),
            })
            .await;
    }

    pub async fn lookup(&self, username: &str) -> Option<Arc<Session>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Lookup {
                username: username.to_string(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.lookup(username).await.is_some()
    }

    /// Usernames of every registered session, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RegistryCommand::Online { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Close the user's session with a policy-violation frame. The entry is
    /// removed by that session's own teardown. Returns whether a session was
    /// found.
    pub async fn kick(&self, username: &str, reason: &str) -> Result<bool, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Kick {
                username: username.to_string(),
                reason: reason.to_string(),
                reply,
            })
            .await
            .map_err(|_| RegistryError::ActorShutdown)?;
        rx.await.map_err(|_| RegistryError::ActorShutdown)
    }
}

async fn run(mut rx: mpsc::Receiver<RegistryCommand>) {
    let mut sessions: HashMap<String, Arc<Session>> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Register { session, reply } => {
                if let Some(stale) = sessions.insert(key(&session.username), session.clone()) {
                    tracing::debug!(
                        username = %session.username,
                        stale = %stale.session_id,
                        "replaced registry entry"
                    );
                }
                let _ = reply.send(());
            }
            RegistryCommand::Unregister {
                username,
                session_id,
            } => {
                let k = key(&username);
                if sessions
                    .get(&k)
                    .is_some_and(|s| s.session_id == session_id)
                {
                    sessions.remove(&k);
                }
            }
            RegistryCommand::Lookup { username, reply } => {
                let _ = reply.send(sessions.get(&key(&username)).cloned());
            }
            RegistryCommand::Online { reply } => {
                let mut names: Vec<String> =
                    sessions.values().map(|s| s.username.clone()).collect();
                names.sort();
                let _ = reply.send(names);
            }
            RegistryCommand::Kick {
                username,
                reason,
                reply,
            } => {
                let found = match sessions.get(&key(&username)) {
                    Some(session) => {
                        session.kick(&reason);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
            }
        }
    }

    tracing::debug!("session registry stopped");
}
