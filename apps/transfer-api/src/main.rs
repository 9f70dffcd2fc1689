use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transfer_api::auth::tokens::TokenManager;
use transfer_api::config::Config;
use transfer_api::db::users::{PgUserStore, UserStore};
use transfer_api::gateway::SessionRegistry;
use transfer_api::irc::{self, ChatNetwork, IrcClient};
use transfer_api::osu::{OsuApiClient, ScoreSource};
use transfer_api::{commands, AppState};

#[tokio::main]
async fn main() {
    // Load .env if present; variables may also come from the environment.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    // Startup order: score source, user store, token manager, registry,
    // chat network.
    let osu: Arc<dyn ScoreSource> = Arc::new(OsuApiClient::new(
        &config.osu_api_url,
        &config.osu_api_key,
    ));

    let db = transfer_api::db::pool::connect(&config.database_url).await;
    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db));

    let tokens = TokenManager::spawn();
    let sessions = SessionRegistry::spawn();

    let (irc_client, irc_events) =
        IrcClient::connect(&config.irc_server, &config.irc_username, &config.irc_password);
    let chat: Arc<dyn ChatNetwork> = Arc::new(irc_client);

    tracing::info!(
        irc_server = %config.irc_server,
        irc_username = %config.irc_username,
        osu_api_url = %config.osu_api_url,
        "transfer-api configured"
    );

    let addr = format!("{}:{}", config.host, config.port);
    let ws_path = config.ws_path.clone();

    let state = AppState {
        config: Arc::new(config),
        users,
        osu,
        chat,
        sessions,
        tokens,
        shutdown: Arc::new(Notify::new()),
    };

    tokio::spawn(irc::bridge::run(state.clone(), irc_events));
    tokio::spawn(commands::run_stdin(state.clone()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(transfer_api::routes::router(&ws_path))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    tracing::info!(%addr, %ws_path, "transfer-api listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await
        .expect("server error");

    tracing::info!("transfer-api stopped");
}

async fn shutdown_signal(quit: Arc<Notify>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(%err, "failed to listen for ctrl-c");
            }
        }
        _ = quit.notified() => {}
    }
    tracing::info!("shutting down");
}
