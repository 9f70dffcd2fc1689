use std::time::Duration;

/// Transfer API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string for the user store.
    pub database_url: String,
    /// Bot nick on the chat network.
    pub irc_username: String,
    /// Server password for the bot nick.
    pub irc_password: String,
    /// Chat network address (`host:port`).
    pub irc_server: String,
    /// osu! web API key.
    pub osu_api_key: String,
    /// osu! web API origin (e.g. `https://osu.ppy.sh`).
    pub osu_api_url: String,
    /// Address the HTTP server binds to.
    pub host: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Path of the streaming endpoint.
    pub ws_path: String,
    /// Notice pushed to every session right after it connects.
    pub welcome_message: String,
    /// Relayed chat lines allowed per session per minute.
    pub max_messages_per_minute: u32,
    /// Length of the rate-limit window `max_messages_per_minute` applies to.
    pub rate_window: Duration,
    /// How long a token request waits for the user's `!assign_token`.
    pub token_reply_window: Duration,
}

pub const DEFAULT_IRC_SERVER: &str = "irc.ppy.sh:6667";
pub const DEFAULT_OSU_API_URL: &str = "https://osu.ppy.sh";
pub const DEFAULT_WS_PATH: &str = "/osu_bot";
pub const DEFAULT_WELCOME_MESSAGE: &str = "Connected to the osu! bot transfer server. Enjoy!";
pub const DEFAULT_MAX_MESSAGES_PER_MINUTE: u32 = 30;
pub const RATE_WINDOW: Duration = Duration::from_secs(60);
pub const TOKEN_REPLY_WINDOW: Duration = Duration::from_secs(60);

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            irc_username: required_var("IRC_USERNAME"),
            irc_password: required_var("IRC_PASSWORD"),
            irc_server: optional_var("IRC_SERVER").unwrap_or_else(|| DEFAULT_IRC_SERVER.into()),
            osu_api_key: required_var("OSU_API_KEY"),
            osu_api_url: optional_var("OSU_API_URL").unwrap_or_else(|| DEFAULT_OSU_API_URL.into()),
            host: optional_var("HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: optional_var("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
            ws_path: optional_var("WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.into()),
            welcome_message: optional_var("WELCOME_MESSAGE")
                .unwrap_or_else(|| DEFAULT_WELCOME_MESSAGE.into()),
            max_messages_per_minute: optional_var("MAX_MESSAGES_PER_MINUTE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_MESSAGES_PER_MINUTE),
            rate_window: RATE_WINDOW,
            token_reply_window: TOKEN_REPLY_WINDOW,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
