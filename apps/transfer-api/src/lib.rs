pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod irc;
pub mod models;
pub mod notification;
pub mod osu;
pub mod routes;

use std::sync::Arc;

use tokio::sync::Notify;

use auth::tokens::TokenManager;
use config::Config;
use db::users::UserStore;
use gateway::SessionRegistry;
use irc::ChatNetwork;
use osu::ScoreSource;

/// Shared application state available to handlers, pumps and commands.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserStore>,
    pub osu: Arc<dyn ScoreSource>,
    pub chat: Arc<dyn ChatNetwork>,
    pub sessions: SessionRegistry,
    pub tokens: TokenManager,
    /// Signalled once to stop the server.
    pub shutdown: Arc<Notify>,
}
