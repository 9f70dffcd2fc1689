//! Score-notification confirmation.
//!
//! A `[RTPPD]` line announces a play the plugin just saw. Before relaying it
//! the line is checked against the score source: the beatmap must be ranked,
//! the play must show up as the user's newest recent score, and the user's
//! rating is re-fetched so the relayed line can carry the rating change.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::Instrument;
use transfer_common::id::{prefix, prefixed_ulid};
use transfer_common::now_millis;

use crate::db::users::UserStore;
use crate::gateway::session::Session;
use crate::irc::ChatNetwork;
use crate::models::user::GameMode;
use crate::osu::ScoreSource;

/// Prefix of every notification line.
pub const NOTIFICATION_PREFIX: &str = "[RTPPD]";

/// Modifiers that never award rating.
pub const UNRANKED_MODS: [&str; 16] = [
    "RL", "Auto", "AP", "V2", "CN", "Co-op", "RD", "1K", "2K", "3K", "4K", "5K", "6K", "7K", "8K",
    "9K",
];

const CONFIRM_ATTEMPTS: u32 = 5;
const CONFIRM_INTERVAL: Duration = Duration::from_secs(1);
/// Largest allowed distance between "now" and the play date, either way.
const CONFIRM_WINDOW_MS: i64 = 30_000;
/// Time for the score source to publish the new rating.
const SETTLE_DELAY: Duration = Duration::from_secs(1);

fn notification_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\[RTPPD\]\[https?://osu\.ppy\.sh/b/(\d+)(?:\s.*)?\](?:\s(\+[\w,\-]*))?\s+\|\s\d+[.,]\d+%\s=>\s\d+[.,]\d+pp\s\((\w+)\)",
        )
        .expect("notification regex is valid")
    })
}

/// Fields extracted from a notification line.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub beatmap_id: i64,
    pub mods: Vec<String>,
    pub mode: GameMode,
}

impl Notification {
    pub fn parse(line: &str) -> Option<Self> {
        let caps = notification_regex().captures(line)?;
        let beatmap_id = caps.get(1)?.as_str().parse().ok()?;
        let mods = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .trim_start_matches('+')
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let mode = GameMode::from_tag(caps.get(3)?.as_str())?;
        Some(Notification {
            beatmap_id,
            mods,
            mode,
        })
    }

    pub fn has_unranked_mod(&self) -> bool {
        self.mods
            .iter()
            .any(|m| UNRANKED_MODS.iter().any(|u| u.eq_ignore_ascii_case(m)))
    }
}

/// Everything the pipeline reads from or writes to.
#[derive(Clone)]
pub struct Pipeline {
    pub osu: Arc<dyn ScoreSource>,
    pub users: Arc<dyn UserStore>,
    pub chat: Arc<dyn ChatNetwork>,
}

impl Pipeline {
    /// Confirm `line` and relay it exactly once, with the rating change
    /// appended when the play could be confirmed.
    pub async fn process(&self, session: &Session, line: String) {
        let confirmation = prefixed_ulid(prefix::CONFIRMATION);
        let span = tracing::info_span!("confirm", %confirmation, session_id = %session.session_id);
        let relayed = match self.annotate(session, &line).instrument(span).await {
            Some(suffix) => format!("{line}{suffix}"),
            None => line,
        };
        tracing::info!(username = %session.username, "[WS -> IRC] {relayed}");
        self.chat.send_message(&session.username, &relayed).await;
    }

    /// Run the checks and return the suffix to append, or `None` to relay
    /// the line unchanged.
    async fn annotate(&self, session: &Session, line: &str) -> Option<String> {
        let note = Notification::parse(line)?;
        if note.has_unranked_mod() {
            tracing::debug!(username = %session.username, mods = ?note.mods, "unranked mod, not confirming");
            return None;
        }

        match self.osu.beatmap(note.beatmap_id).await {
            Ok(beatmap) if beatmap.is_ranked() => {}
            Ok(beatmap) => {
                tracing::debug!(beatmap_id = beatmap.beatmap_id, approved = beatmap.approved, "beatmap not ranked");
                return None;
            }
            Err(err) => {
                tracing::warn!(beatmap_id = note.beatmap_id, %err, "beatmap lookup failed");
                return None;
            }
        }

        // One confirmation at a time per session, so overlapping plays never
        // race on the stored rating.
        let _guard = session.confirm_lock.lock().await;

        if !self.confirm_recent_play(session, note.mode).await {
            tracing::info!(username = %session.username, mode = %note.mode, "play not confirmed");
            return None;
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        let pp = match self.osu.user_pp(session.user_id, note.mode).await {
            Ok(pp) => pp,
            Err(err) => {
                tracing::warn!(username = %session.username, %err, "rating lookup failed");
                return None;
            }
        };

        let (previous, record) = session.update_user(|user| {
            let previous = user.rating(note.mode);
            user.set_rating(note.mode, pp);
            (previous, user.clone())
        });
        if let Err(err) = self.users.upsert(&record).await {
            tracing::error!(username = %session.username, ?err, "failed to persist rating");
        }

        if previous < 0.0 {
            // Nothing to compare against yet.
            return None;
        }
        Some(format!(" ({:+.2}pp)", pp - previous))
    }

    async fn confirm_recent_play(&self, session: &Session, mode: GameMode) -> bool {
        for attempt in 0..CONFIRM_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(CONFIRM_INTERVAL).await;
            }
            let play = match self.osu.user_recent(session.user_id, mode).await {
                Ok(play) => play,
                Err(err) => {
                    tracing::debug!(username = %session.username, attempt, %err, "recent play lookup failed");
                    continue;
                }
            };
            let date_ms = play.date.timestamp_millis();
            let fresh = (now_millis() - date_ms).abs() < CONFIRM_WINDOW_MS;
            if fresh && session.advance_confirmed(date_ms) {
                return true;
            }
        }
        false
    }
}
