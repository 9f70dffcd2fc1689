//! Bearer tokens handed to a session for the companion HTTP API.
//!
//! The session → token map is owned by a single actor task. Every mutation
//! and query is a message on one queue, so the map is never touched
//! concurrently.

use std::collections::HashMap;

use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Queue depth for token commands.
const CHANNEL_CAPACITY: usize = 64;

/// Random bytes per token (before base64).
const TOKEN_BYTES: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The session already holds a token; tokens are granted once per session.
    #[error("a token was already issued to this session")]
    AlreadyIssued,
    #[error("token manager has shut down")]
    ActorShutdown,
}

/// Generate an opaque random token with the given prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

/// Compare a caller-supplied token against the issued one in constant time.
pub fn tokens_match(issued: &str, supplied: &str) -> bool {
    if issued.len() != supplied.len() {
        return false;
    }
    issued.as_bytes().ct_eq(supplied.as_bytes()).into()
}

enum TokenCommand {
    Request {
        session_id: String,
        reply: oneshot::Sender<Result<String, TokenError>>,
    },
    Revoke {
        session_id: String,
    },
    Lookup {
        session_id: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Cloneable handle to the token actor.
#[derive(Clone)]
pub struct TokenManager {
    tx: mpsc::Sender<TokenCommand>,
}

impl TokenManager {
    /// Start the actor on the current runtime and return its handle.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Issue a fresh token for `session_id`.
    ///
    /// Fails with [`TokenError::AlreadyIssued`] if the session already holds
    /// one; the existing token is left untouched.
    pub async fn request_token(&self, session_id: &str) -> Result<String, TokenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::Request {
                session_id: session_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| TokenError::ActorShutdown)?;
        rx.await.map_err(|_| TokenError::ActorShutdown)?
    }

    /// Drop the session's token, if any.
    pub async fn revoke(&self, session_id: &str) {
        let _ = self
            .tx
            .send(TokenCommand::Revoke {
                session_id: session_id.to_string(),
            })
            .await;
    }

    pub async fn lookup(&self, session_id: &str) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::Lookup {
                session_id: session_id.to_string(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn has_token(&self, session_id: &str) -> bool {
        self.lookup(session_id).await.is_some()
    }
}

async fn run(mut rx: mpsc::Receiver<TokenCommand>) {
    let mut tokens: HashMap<String, String> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TokenCommand::Request { session_id, reply } => {
                let result = if tokens.contains_key(&session_id) {
                    Err(TokenError::AlreadyIssued)
                } else {
                    let token = generate_opaque_token("pbt", TOKEN_BYTES);
                    tokens.insert(session_id, token.clone());
                    Ok(token)
                };
                let _ = reply.send(result);
            }
            TokenCommand::Revoke { session_id } => {
                tokens.remove(&session_id);
            }
            TokenCommand::Lookup { session_id, reply } => {
                let _ = reply.send(tokens.get(&session_id).cloned());
            }
        }
    }

    tracing::debug!("token manager stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_tokens_are_prefixed_and_random() {
        let a = generate_opaque_token("pbt", TOKEN_BYTES);
        let b = generate_opaque_token("pbt", TOKEN_BYTES);
        assert!(a.starts_with("pbt_"));
        assert_ne!(a, b);
        // 24 bytes -> 32 base64 chars without padding.
        assert_eq!(a.len(), 4 + 32);
    }

    #[test]
    fn constant_time_match() {
        assert!(tokens_match("pbt_abc", "pbt_abc"));
        assert!(!tokens_match("pbt_abc", "pbt_abd"));
        assert!(!tokens_match("pbt_abc", "pbt_ab"));
        assert!(!tokens_match("pbt_abc", ""));
    }

    #[tokio::test]
    async fn request_then_lookup() {
        let tm = TokenManager::spawn();
        assert!(!tm.has_token("ses_1").await);

        let token = tm.request_token("ses_1").await.unwrap();
        assert_eq!(tm.lookup("ses_1").await.as_deref(), Some(token.as_str()));
        assert!(tm.has_token("ses_1").await);
        assert!(!tm.has_token("ses_2").await);
    }

    #[tokio::test]
    async fn second_request_is_refused_and_keeps_first_token() {
        let tm = TokenManager::spawn();
        let first = tm.request_token("ses_1").await.unwrap();

        assert_eq!(tm.request_token("ses_1").await, Err(TokenError::AlreadyIssued));
        assert_eq!(tm.lookup("ses_1").await, Some(first));
    }

    #[tokio::test]
    async fn revoke_allows_a_new_grant() {
        let tm = TokenManager::spawn();
        let first = tm.request_token("ses_1").await.unwrap();

        tm.revoke("ses_1").await;
        assert!(!tm.has_token("ses_1").await);

        let second = tm.request_token("ses_1").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn tokens_are_per_session() {
        let tm = TokenManager::spawn();
        let a = tm.request_token("ses_a").await.unwrap();
        let b = tm.request_token("ses_b").await.unwrap();
        assert_ne!(a, b);

        tm.revoke("ses_a").await;
        assert_eq!(tm.lookup("ses_b").await, Some(b));
    }
}
