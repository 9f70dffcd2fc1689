pub mod api;
pub mod health;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router(ws_path: &str) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router(ws_path))
        .merge(api::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        api::is_online,
        api::token_valid,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::ErrorCode,
            health::HealthResponse,
            api::OnlineResponse,
            api::TokenValidResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Presence", description = "User presence"),
        (name = "Tokens", description = "Session token validation"),
    )
)]
pub struct ApiDoc;
