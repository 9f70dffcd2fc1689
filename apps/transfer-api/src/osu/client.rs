//! HTTP client for the osu! web API (v1).

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::models::user::GameMode;

use super::{
    first_record, Beatmap, OsuApiError, RawBeatmap, RawRecent, RawUser, RecentPlay, ScoreSource,
    UserInfo,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct OsuApiClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OsuApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build osu! API HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, OsuApiError> {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        let resp = self
            .http
            .get(&url)
            .query(&[("k", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        if !resp.status().is_success() {
            tracing::warn!(%endpoint, status = %resp.status(), "osu! api returned an error status");
            return Err(OsuApiError::Status(resp.status()));
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ScoreSource for OsuApiClient {
    async fn user_by_name(&self, username: &str) -> Result<UserInfo, OsuApiError> {
        let records: Vec<RawUser> = self
            .get(
                "get_user",
                &[("u", username.to_string()), ("type", "string".into())],
            )
            .await?;
        first_record(records)
    }

    async fn user_pp(&self, user_id: i64, mode: GameMode) -> Result<f64, OsuApiError> {
        let records: Vec<RawUser> = self
            .get(
                "get_user",
                &[
                    ("u", user_id.to_string()),
                    ("type", "id".into()),
                    ("m", mode.code().to_string()),
                ],
            )
            .await?;
        let user: UserInfo = first_record(records)?;
        user.pp_raw.ok_or(OsuApiError::Malformed("pp_raw"))
    }

    async fn beatmap(&self, beatmap_id: i64) -> Result<Beatmap, OsuApiError> {
        let records: Vec<RawBeatmap> = self
            .get("get_beatmaps", &[("b", beatmap_id.to_string())])
            .await?;
        first_record(records)
    }

    async fn user_recent(&self, user_id: i64, mode: GameMode) -> Result<RecentPlay, OsuApiError> {
        let records: Vec<RawRecent> = self
            .get(
                "get_user_recent",
                &[
                    ("u", user_id.to_string()),
                    ("type", "id".into()),
                    ("m", mode.code().to_string()),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        first_record(records)
    }
}
