//! Companion query endpoints used by other services.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::tokens::tokens_match;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/is_online", get(is_online))
        .route("/api/token_valid", get(token_valid))
}

// ---------------------------------------------------------------------------
// GET /api/is_online
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct OnlineParams {
    /// Username to look up.
    pub u: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineResponse {
    /// The user is present on the chat network.
    pub irc_online: bool,
    /// The user has a live plugin session.
    pub sync_online: bool,
}

/// `GET /api/is_online`: Chat-network and session presence of a user.
#[utoipa::path(
    get,
    path = "/api/is_online",
    tag = "Presence",
    params(OnlineParams),
    responses(
        (status = 200, description = "Presence flags", body = OnlineResponse),
    ),
)]
pub async fn is_online(
    State(state): State<AppState>,
    Query(params): Query<OnlineParams>,
) -> Json<OnlineResponse> {
    Json(OnlineResponse {
        irc_online: state.chat.is_online(&params.u),
        sync_online: state.sessions.is_online(&params.u).await,
    })
}

// ---------------------------------------------------------------------------
// GET /api/token_valid
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct TokenParams {
    /// Username the token was issued to.
    pub u: String,
    /// Token to check.
    pub k: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenValidResponse {
    pub valid: bool,
}

/// `GET /api/token_valid`: Check a token against the user's live session.
#[utoipa::path(
    get,
    path = "/api/token_valid",
    tag = "Tokens",
    params(TokenParams),
    responses(
        (status = 200, description = "Whether the token is valid", body = TokenValidResponse),
    ),
)]
pub async fn token_valid(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
) -> Json<TokenValidResponse> {
    let valid = match state.sessions.lookup(&params.u).await {
        Some(session) => match state.tokens.lookup(&session.session_id).await {
            Some(issued) => tokens_match(&issued, &params.k),
            None => false,
        },
        None => false,
    };
    Json(TokenValidResponse { valid })
}
