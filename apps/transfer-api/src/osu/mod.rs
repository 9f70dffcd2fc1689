//! External score data: users, beatmaps, recent plays and ratings.

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::models::user::GameMode;

pub use client::OsuApiClient;

/// `approved` value of a ranked beatmap.
pub const APPROVED_RANKED: i32 = 1;

/// Timestamp layout used by the web API (always UTC).
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum OsuApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
    #[error("no matching record")]
    NotFound,
    #[error("malformed field `{0}`")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserInfo {
    pub user_id: i64,
    pub username: String,
    /// `None` for accounts that have never been ranked in the mode.
    pub pp_raw: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beatmap {
    pub beatmap_id: i64,
    pub approved: i32,
}

impl Beatmap {
    pub fn is_ranked(&self) -> bool {
        self.approved == APPROVED_RANKED
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentPlay {
    pub beatmap_id: i64,
    pub date: DateTime<Utc>,
}

/// Source of score data. Implemented by [`OsuApiClient`]; tests use stubs.
#[async_trait]
pub trait ScoreSource: Send + Sync {
    async fn user_by_name(&self, username: &str) -> Result<UserInfo, OsuApiError>;
    async fn user_pp(&self, user_id: i64, mode: GameMode) -> Result<f64, OsuApiError>;
    async fn beatmap(&self, beatmap_id: i64) -> Result<Beatmap, OsuApiError>;
    async fn user_recent(&self, user_id: i64, mode: GameMode) -> Result<RecentPlay, OsuApiError>;
}

// ---------------------------------------------------------------------------
// Wire records (every value is a string in the v1 API)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RawUser {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub pp_raw: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBeatmap {
    pub beatmap_id: String,
    pub approved: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRecent {
    pub beatmap_id: String,
    pub date: String,
}

impl TryFrom<RawUser> for UserInfo {
    type Error = OsuApiError;

    fn try_from(raw: RawUser) -> Result<Self, Self::Error> {
        let user_id = raw
            .user_id
            .parse()
            .map_err(|_| OsuApiError::Malformed("user_id"))?;
        let pp_raw = match raw.pp_raw {
            Some(pp) => Some(pp.parse().map_err(|_| OsuApiError::Malformed("pp_raw"))?),
            None => None,
        };
        Ok(UserInfo {
            user_id,
            username: raw.username,
            pp_raw,
        })
    }
}

impl TryFrom<RawBeatmap> for Beatmap {
    type Error = OsuApiError;

    fn try_from(raw: RawBeatmap) -> Result<Self, Self::Error> {
        Ok(Beatmap {
            beatmap_id: raw
                .beatmap_id
                .parse()
                .map_err(|_| OsuApiError::Malformed("beatmap_id"))?,
            approved: raw
                .approved
                .parse()
                .map_err(|_| OsuApiError::Malformed("approved"))?,
        })
    }
}

impl TryFrom<RawRecent> for RecentPlay {
    type Error = OsuApiError;

    fn try_from(raw: RawRecent) -> Result<Self, Self::Error> {
        let date = NaiveDateTime::parse_from_str(&raw.date, DATE_FORMAT)
            .map_err(|_| OsuApiError::Malformed("date"))?
            .and_utc();
        Ok(RecentPlay {
            beatmap_id: raw
                .beatmap_id
                .parse()
                .map_err(|_| OsuApiError::Malformed("beatmap_id"))?,
            date,
        })
    }
}

/// Take the first record of an API array and convert it.
pub(crate) fn first_record<R, T>(records: Vec<R>) -> Result<T, OsuApiError>
where
    T: TryFrom<R, Error = OsuApiError>,
{
    records
        .into_iter()
        .next()
        .ok_or(OsuApiError::NotFound)
        .and_then(T::try_from)
}
