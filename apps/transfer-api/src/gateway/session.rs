//! Per-connection session state shared by the two pumps.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use transfer_common::id::{prefix, PrefixedId};

use crate::models::user::UserRecord;

use super::protocol::{self, ProtocolVersion};

/// Depth of each outbound queue.
const QUEUE_CAPACITY: usize = 64;

/// Status bits.
pub const CONNECTED: u32 = 1;
/// A token request is waiting for the user's `!assign_token` reply.
pub const AWAITING_REPLY: u32 = 2;

/// Receiving ends of the outbound queues, owned by the outbound pump.
pub struct Outbound {
    pub text: mpsc::Receiver<String>,
    pub binary: mpsc::Receiver<Vec<u8>>,
    /// Set once when the session is kicked; carries the close reason.
    pub kick: watch::Receiver<Option<String>>,
}

impl Outbound {
    pub fn kick_reason(&self) -> Option<String> {
        self.kick.borrow().clone()
    }
}

/// State for one live streaming connection.
pub struct Session {
    /// Unique per connection (`ses_` prefixed ULID); two sessions of the same
    /// user never share it.
    pub session_id: String,
    pub username: String,
    pub user_id: i64,
    pub version: ProtocolVersion,
    /// Snapshot of the persisted record, kept current by rating updates.
    user: Mutex<UserRecord>,
    text_tx: mpsc::Sender<String>,
    binary_tx: mpsc::Sender<Vec<u8>>,
    kick_tx: watch::Sender<Option<String>>,
    status: AtomicU32,
    /// Chat lines relayed in the current one-minute window.
    sent_count: AtomicU32,
    /// Date (ms) of the newest play already confirmed for this session.
    last_confirmed_ms: AtomicI64,
    /// Serializes notification confirmations of this session.
    pub(crate) confirm_lock: tokio::sync::Mutex<()>,
}

impl PrefixedId for Session {
    const PREFIX: &'static str = prefix::SESSION;
}

impl Session {
    pub fn new(user: UserRecord, version: ProtocolVersion) -> (Arc<Self>, Outbound) {
        let (text_tx, text) = mpsc::channel(QUEUE_CAPACITY);
        let (binary_tx, binary) = mpsc::channel(QUEUE_CAPACITY);
        let (kick_tx, kick) = watch::channel(None);
        let session = Session {
            session_id: Self::generate(),
            username: user.username.clone(),
            user_id: user.uid,
            version,
            user: Mutex::new(user),
            text_tx,
            binary_tx,
            kick_tx,
            status: AtomicU32::new(CONNECTED),
            sent_count: AtomicU32::new(0),
            last_confirmed_ms: AtomicI64::new(0),
            confirm_lock: tokio::sync::Mutex::new(()),
        };
        (
            Arc::new(session),
            Outbound {
                text,
                binary,
                kick,
            },
        )
    }

    // -- outbound ----------------------------------------------------------

    /// Queue a text frame. Once the outbound pump is gone this is a no-op.
    pub async fn send_text(&self, text: impl Into<String>) {
        if self.text_tx.send(text.into()).await.is_err() {
            tracing::debug!(session_id = %self.session_id, "text dropped, session closed");
        }
    }

    /// Queue a server notice (text frame with the notice header).
    pub async fn send_notice(&self, text: &str) {
        self.send_text(protocol::notice(text)).await;
    }

    pub async fn send_binary(&self, frame: Vec<u8>) {
        if self.binary_tx.send(frame).await.is_err() {
            tracing::debug!(session_id = %self.session_id, "binary dropped, session closed");
        }
    }

    /// Ask the outbound pump to close the connection with a policy-violation
    /// frame. Never waits and never competes with queued frames, so it is
    /// safe to call from the registry loop. The first reason wins.
    pub fn kick(&self, reason: &str) {
        let queued = self.kick_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.to_string());
            true
        });
        if !queued {
            tracing::debug!(session_id = %self.session_id, "session already kicked");
        }
    }

    // -- status flags ------------------------------------------------------

    pub fn has_flag(&self, flag: u32) -> bool {
        self.status.load(Ordering::Acquire) & flag != 0
    }

    /// Set `flag`; returns `false` if it was already set.
    pub fn try_set_flag(&self, flag: u32) -> bool {
        self.status.fetch_or(flag, Ordering::AcqRel) & flag == 0
    }

    pub fn clear_flag(&self, flag: u32) {
        self.status.fetch_and(!flag, Ordering::AcqRel);
    }

    pub fn is_connected(&self) -> bool {
        self.has_flag(CONNECTED)
    }

    // -- rate limiting -----------------------------------------------------

    /// Count one relayed line against the current window. Returns `false`
    /// (and counts nothing) once `ceiling` lines were already relayed.
    pub fn try_consume_message(&self, ceiling: u32) -> bool {
        self.sent_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < ceiling).then_some(n + 1)
            })
            .is_ok()
    }

    /// Start a new window. Called by the outbound pump's ticker.
    pub fn reset_message_count(&self) {
        self.sent_count.store(0, Ordering::Release);
    }

    // -- notification confirmation -----------------------------------------

    pub fn last_confirmed_ms(&self) -> i64 {
        self.last_confirmed_ms.load(Ordering::Acquire)
    }

    /// Move the confirmation watermark forward to `date_ms`. Returns `false`
    /// if a play at or after `date_ms` was already confirmed.
    pub fn advance_confirmed(&self, date_ms: i64) -> bool {
        self.last_confirmed_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                (date_ms > prev).then_some(date_ms)
            })
            .is_ok()
    }

    // -- user record -------------------------------------------------------

    pub fn user(&self) -> UserRecord {
        self.user.lock().clone()
    }

    pub fn update_user<R>(&self, f: impl FnOnce(&mut UserRecord) -> R) -> R {
        f(&mut self.user.lock())
    }
}
