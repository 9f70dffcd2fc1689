//! Connection setup: resolve (or create) the user record behind a handshake.

use thiserror::Error;
use transfer_common::now_millis;

use crate::db::users::{StoreError, UserStore};
use crate::error::ApiError;
use crate::models::user::{GameMode, UserRecord};
use crate::osu::{OsuApiError, ScoreSource};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("user `{0}` does not exist")]
    UnknownUser(String),
    #[error("score source unavailable: {0}")]
    Upstream(#[from] OsuApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<HandshakeError> for ApiError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::UnknownUser(name) => {
                ApiError::not_found(format!("User({name}) does not exist."))
            }
            HandshakeError::Upstream(err) => {
                tracing::warn!(%err, "user lookup failed upstream");
                ApiError::bad_gateway("Could not reach the osu! API")
            }
            HandshakeError::Store(err) => err.into(),
        }
    }
}

/// Turn the handshake's target name into the chat-network nick.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().replace(' ', "_")
}

/// Load the record for `username`, creating it from the score source on
/// first sight. The returned record has been normalized (login stamped,
/// expired ban cleared), has every resolvable rating filled in, and has
/// been persisted on a best-effort basis.
pub async fn resolve_user(
    users: &dyn UserStore,
    osu: &dyn ScoreSource,
    username: &str,
) -> Result<UserRecord, HandshakeError> {
    let now = now_millis();

    let mut user = match users.get_by_name(username).await? {
        Some(user) => user,
        None => {
            let info = match osu.user_by_name(username).await {
                Ok(info) => info,
                Err(OsuApiError::NotFound) => {
                    return Err(HandshakeError::UnknownUser(username.to_string()))
                }
                Err(err) => return Err(err.into()),
            };
            // Stored under the same nick form the handshake and the console
            // use, so the next login finds it without another API call.
            let nick = normalize_username(&info.username);
            // A known id under a new name is a rename, not a new user.
            match users.get_by_id(info.user_id).await? {
                Some(mut renamed) => {
                    tracing::info!(
                        uid = info.user_id,
                        old = %renamed.username,
                        new = %nick,
                        "user renamed"
                    );
                    renamed.username = nick;
                    renamed
                }
                None => {
                    tracing::info!(uid = info.user_id, username = %nick, "new user");
                    UserRecord::new(info.user_id, nick, now)
                }
            }
        }
    };

    user.touch(now);
    fill_missing_ratings(osu, &mut user).await;

    if let Err(err) = users.upsert(&user).await {
        tracing::error!(username = %user.username, ?err, "failed to persist user on login");
    }

    Ok(user)
}

/// Fetch every rating still at the unfetched sentinel. Failures leave the
/// sentinel in place for the next login.
async fn fill_missing_ratings(osu: &dyn ScoreSource, user: &mut UserRecord) {
    for mode in GameMode::ALL {
        if !user.needs_rating(mode) {
            continue;
        }
        match osu.user_pp(user.uid, mode).await {
            Ok(pp) => user.set_rating(mode, pp),
            Err(err) => {
                tracing::warn!(username = %user.username, %mode, %err, "could not fetch rating")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::db::users::MemoryUserStore;
    use crate::osu::{Beatmap, RecentPlay, UserInfo};

    struct FakeOsu {
        /// Lookup name to `(user id, display name)`.
        users: HashMap<String, (i64, String)>,
        pp: f64,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl ScoreSource for FakeOsu {
        async fn user_by_name(&self, username: &str) -> Result<UserInfo, OsuApiError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.users
                .get(username)
                .map(|(user_id, display)| UserInfo {
                    user_id: *user_id,
                    username: display.clone(),
                    pp_raw: Some(self.pp),
                })
                .ok_or(OsuApiError::NotFound)
        }

        async fn user_pp(&self, _user_id: i64, mode: GameMode) -> Result<f64, OsuApiError> {
            match mode {
                GameMode::Mania => Err(OsuApiError::Malformed("pp_raw")),
                _ => Ok(self.pp),
            }
        }

        async fn beatmap(&self, _beatmap_id: i64) -> Result<Beatmap, OsuApiError> {
            Err(OsuApiError::NotFound)
        }

        async fn user_recent(&self, _: i64, _: GameMode) -> Result<RecentPlay, OsuApiError> {
            Err(OsuApiError::NotFound)
        }
    }

    fn osu() -> FakeOsu {
        let user = |id: i64, display: &str| (id, display.to_string());
        FakeOsu {
            users: HashMap::from([
                ("alice".to_string(), user(7, "alice")),
                ("alice_new".to_string(), user(7, "alice_new")),
                ("Mr_Ekko".to_string(), user(8, "Mr Ekko")),
            ]),
            pp: 1234.5,
            lookups: AtomicUsize::new(0),
        }
    }

    #[test]
    fn spaces_become_underscores() {
        assert_eq!(normalize_username(" Mr Ekko "), "Mr_Ekko");
    }

    #[tokio::test]
    async fn first_sight_creates_record_with_ratings() {
        let store = MemoryUserStore::new();
        let user = resolve_user(&store, &osu(), "alice").await.unwrap();

        assert_eq!(user.uid, 7);
        assert_eq!(user.rating(GameMode::Std), 1234.5);
        assert!(user.needs_rating(GameMode::Mania));
        assert_eq!(store.get_by_id(7).await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let store = MemoryUserStore::new();
        let err = resolve_user(&store, &osu(), "nobody").await.unwrap_err();
        assert!(matches!(err, HandshakeError::UnknownUser(name) if name == "nobody"));
    }

    #[tokio::test]
    async fn rename_keeps_the_existing_record() {
        let store = MemoryUserStore::new();
        let mut old = UserRecord::new(7, "alice", 0);
        old.set_rating(GameMode::Std, 99.0);
        store.upsert(&old).await.unwrap();

        let user = resolve_user(&store, &osu(), "alice_new").await.unwrap();
        assert_eq!(user.username, "alice_new");
        assert_eq!(user.rating(GameMode::Std), 99.0);
        assert_eq!(user.first_login_date, 0);
    }

    #[tokio::test]
    async fn spaced_display_name_is_stored_as_nick() {
        let store = MemoryUserStore::new();
        let osu = osu();

        let user = resolve_user(&store, &osu, "Mr_Ekko").await.unwrap();
        assert_eq!(user.username, "Mr_Ekko");
        assert_eq!(store.get_by_name("mr_ekko").await.unwrap().unwrap().uid, 8);

        // The second login is served from the store.
        resolve_user(&store, &osu, "Mr_Ekko").await.unwrap();
        assert_eq!(osu.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn active_ban_is_kept_and_expired_ban_cleared() {
        let store = MemoryUserStore::new();
        let now = now_millis();

        let mut banned = UserRecord::new(1, "banned", now);
        banned.ban(Duration::from_secs(180), now);
        store.upsert(&banned).await.unwrap();

        let mut expired = UserRecord::new(2, "expired", now);
        expired.ban(Duration::from_secs(60), now - 120_000);
        store.upsert(&expired).await.unwrap();

        let user = resolve_user(&store, &osu(), "banned").await.unwrap();
        assert!(user.is_banned());

        let user = resolve_user(&store, &osu(), "expired").await.unwrap();
        assert!(!user.is_banned());
        assert!(!store.get_by_id(2).await.unwrap().unwrap().is_banned());
    }
}
