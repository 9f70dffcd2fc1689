use std::fmt;
use std::time::Duration;

use diesel::prelude::*;

use crate::db::schema::users;

/// Rating value meaning "not fetched from osu! yet".
pub const UNFETCHED_RATING: f64 = -1.0;

/// The four osu! score categories, in the order the web API numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameMode {
    Std,
    Taiko,
    Ctb,
    Mania,
}

impl GameMode {
    pub const ALL: [GameMode; 4] = [GameMode::Std, GameMode::Taiko, GameMode::Ctb, GameMode::Mania];

    /// Numeric code used by the osu! web API (`m=` parameter).
    pub fn code(self) -> u8 {
        match self {
            GameMode::Std => 0,
            GameMode::Taiko => 1,
            GameMode::Ctb => 2,
            GameMode::Mania => 3,
        }
    }

    /// Parse the category tag written by the in-game notification plugin.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "std" | "osu" => Some(GameMode::Std),
            "taiko" => Some(GameMode::Taiko),
            "ctb" | "catch" | "fruits" => Some(GameMode::Ctb),
            "mania" => Some(GameMode::Mania),
            _ => None,
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            GameMode::Std => "std",
            GameMode::Taiko => "taiko",
            GameMode::Ctb => "ctb",
            GameMode::Mania => "mania",
        };
        f.write_str(tag)
    }
}

/// A persisted user, keyed by the osu! user id.
///
/// All timestamps and durations are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = users)]
#[diesel(primary_key(uid))]
pub struct UserRecord {
    pub uid: i64,
    pub username: String,
    pub banned: bool,
    pub banned_duration: i64,
    pub banned_date: i64,
    pub first_login_date: i64,
    pub last_login_date: i64,
    pub std_pp: f64,
    pub taiko_pp: f64,
    pub ctb_pp: f64,
    pub mania_pp: f64,
}

impl UserRecord {
    /// A first-seen user with no ban and all ratings unfetched.
    pub fn new(uid: i64, username: impl Into<String>, now_ms: i64) -> Self {
        Self {
            uid,
            username: username.into(),
            banned: false,
            banned_duration: 0,
            banned_date: 0,
            first_login_date: now_ms,
            last_login_date: now_ms,
            std_pp: UNFETCHED_RATING,
            taiko_pp: UNFETCHED_RATING,
            ctb_pp: UNFETCHED_RATING,
            mania_pp: UNFETCHED_RATING,
        }
    }

    pub fn ban(&mut self, duration: Duration, now_ms: i64) {
        self.banned = true;
        self.banned_date = now_ms;
        self.banned_duration = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
    }

    pub fn unban(&mut self) {
        self.banned = false;
        self.banned_date = 0;
        self.banned_duration = 0;
    }

    pub fn is_banned(&self) -> bool {
        self.banned
    }

    /// Time left on the ban, zero once it has run out (or if not banned).
    pub fn ban_remaining(&self, now_ms: i64) -> Duration {
        if !self.banned {
            return Duration::ZERO;
        }
        let remaining = self
            .banned_date
            .saturating_add(self.banned_duration)
            .saturating_sub(now_ms);
        Duration::from_millis(remaining.max(0) as u64)
    }

    /// Normalization applied every time a record is loaded: stamp the login
    /// time and drop a ban that has already run out.
    pub fn touch(&mut self, now_ms: i64) {
        self.last_login_date = now_ms;
        if self.banned && self.ban_remaining(now_ms).is_zero() {
            self.unban();
        }
    }

    pub fn rating(&self, mode: GameMode) -> f64 {
        match mode {
            GameMode::Std => self.std_pp,
            GameMode::Taiko => self.taiko_pp,
            GameMode::Ctb => self.ctb_pp,
            GameMode::Mania => self.mania_pp,
        }
    }

    pub fn set_rating(&mut self, mode: GameMode, pp: f64) {
        match mode {
            GameMode::Std => self.std_pp = pp,
            GameMode::Taiko => self.taiko_pp = pp,
            GameMode::Ctb => self.ctb_pp = pp,
            GameMode::Mania => self.mania_pp = pp,
        }
    }

    /// Whether the stored rating is the unfetched sentinel (any negative value).
    pub fn needs_rating(&self, mode: GameMode) -> bool {
        self.rating(mode) < 0.0
    }
}

/// Human-readable ban countdown, e.g. `"3 minutes 0 seconds"`.
pub fn format_ban_remaining(remaining: Duration) -> String {
    let total = remaining.as_secs();
    format!("{} minutes {} seconds", total / 60, total % 60)
}
