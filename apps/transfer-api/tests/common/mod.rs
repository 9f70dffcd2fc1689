#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use transfer_api::auth::tokens::TokenManager;
use transfer_api::config::Config;
use transfer_api::db::users::{MemoryUserStore, UserStore};
use transfer_api::gateway::SessionRegistry;
use transfer_api::irc::ChatNetwork;
use transfer_api::models::user::GameMode;
use transfer_api::osu::{Beatmap, OsuApiError, RecentPlay, ScoreSource, UserInfo};
use transfer_api::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Rate-limit ceiling used by every test state.
pub const TEST_MESSAGES_PER_MINUTE: u32 = 3;
pub const TEST_WELCOME: &str = "Welcome to the test bridge";

// ---------------------------------------------------------------------------
// Score source stub
// ---------------------------------------------------------------------------

/// In-memory score source. Everything unknown is `NotFound`.
#[derive(Default)]
pub struct StubScoreSource {
    /// Lowercased lookup name to `(user id, display name)`.
    users: Mutex<HashMap<String, (i64, String)>>,
    beatmaps: Mutex<HashMap<i64, i32>>,
    pp: Mutex<HashMap<GameMode, f64>>,
    recent: Mutex<Option<DateTime<Utc>>>,
    pub recent_calls: AtomicUsize,
}

impl StubScoreSource {
    pub fn add_user(&self, name: &str, user_id: i64) {
        self.add_display_user(name, user_id, name);
    }

    /// A user the score source reports under a different display name,
    /// e.g. `"Mr Ekko"` looked up as `"Mr_Ekko"`.
    pub fn add_display_user(&self, lookup: &str, user_id: i64, display: &str) {
        self.users
            .lock()
            .insert(lookup.to_lowercase(), (user_id, display.to_string()));
    }

    pub fn add_beatmap(&self, beatmap_id: i64, approved: i32) {
        self.beatmaps.lock().insert(beatmap_id, approved);
    }

    pub fn set_pp(&self, mode: GameMode, pp: f64) {
        self.pp.lock().insert(mode, pp);
    }

    /// Date of the play every `user_recent` call reports.
    pub fn set_recent(&self, date: Option<DateTime<Utc>>) {
        *self.recent.lock() = date;
    }

    pub fn recent_calls(&self) -> usize {
        self.recent_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoreSource for StubScoreSource {
    async fn user_by_name(&self, username: &str) -> Result<UserInfo, OsuApiError> {
        let (user_id, display) = self
            .users
            .lock()
            .get(&username.to_lowercase())
            .cloned()
            .ok_or(OsuApiError::NotFound)?;
        Ok(UserInfo {
            user_id,
            username: display,
            pp_raw: None,
        })
    }

    async fn user_pp(&self, _user_id: i64, mode: GameMode) -> Result<f64, OsuApiError> {
        self.pp.lock().get(&mode).copied().ok_or(OsuApiError::NotFound)
    }

    async fn beatmap(&self, beatmap_id: i64) -> Result<Beatmap, OsuApiError> {
        let approved = *self
            .beatmaps
            .lock()
            .get(&beatmap_id)
            .ok_or(OsuApiError::NotFound)?;
        Ok(Beatmap {
            beatmap_id,
            approved,
        })
    }

    async fn user_recent(&self, _user_id: i64, _mode: GameMode) -> Result<RecentPlay, OsuApiError> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        let date = (*self.recent.lock()).ok_or(OsuApiError::NotFound)?;
        Ok(RecentPlay {
            beatmap_id: 0,
            date,
        })
    }
}

// ---------------------------------------------------------------------------
// Chat network stub
// ---------------------------------------------------------------------------

/// Records every outbound chat message.
#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(String, String)>>,
    online: Mutex<HashSet<String>>,
}

impl RecordingChat {
    pub fn set_online(&self, nick: &str) {
        self.online.lock().insert(nick.to_lowercase());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// Wait until at least `n` messages were sent, then return them all.
    pub async fn wait_for(&self, n: usize) -> Vec<(String, String)> {
        for _ in 0..500 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} chat messages, got {:?}", self.sent());
    }
}

#[async_trait]
impl ChatNetwork for RecordingChat {
    async fn send_message(&self, target: &str, text: &str) {
        self.sent.lock().push((target.to_string(), text.to_string()));
    }

    fn is_online(&self, nick: &str) -> bool {
        self.online.lock().contains(&nick.to_lowercase())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

pub struct TestContext {
    pub state: AppState,
    pub users: Arc<MemoryUserStore>,
    pub osu: Arc<StubScoreSource>,
    pub chat: Arc<RecordingChat>,
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".into(),
        irc_username: "TransferBot".into(),
        irc_password: "secret".into(),
        irc_server: "127.0.0.1:0".into(),
        osu_api_key: "key".into(),
        osu_api_url: "http://127.0.0.1:0".into(),
        host: "127.0.0.1".into(),
        port: 0,
        ws_path: "/osu_bot".into(),
        welcome_message: TEST_WELCOME.into(),
        max_messages_per_minute: TEST_MESSAGES_PER_MINUTE,
        rate_window: transfer_api::config::RATE_WINDOW,
        token_reply_window: transfer_api::config::TOKEN_REPLY_WINDOW,
    }
}

/// Build an AppState over in-memory stubs.
pub fn test_state() -> TestContext {
    test_state_with(|_| {})
}

/// Like [`test_state`], with the config adjusted first.
pub fn test_state_with(configure: impl FnOnce(&mut Config)) -> TestContext {
    let mut config = test_config();
    configure(&mut config);

    let users = Arc::new(MemoryUserStore::new());
    let osu = Arc::new(StubScoreSource::default());
    let chat = Arc::new(RecordingChat::default());

    let state = AppState {
        config: Arc::new(config),
        users: users.clone() as Arc<dyn UserStore>,
        osu: osu.clone() as Arc<dyn ScoreSource>,
        chat: chat.clone() as Arc<dyn ChatNetwork>,
        sessions: SessionRegistry::spawn(),
        tokens: TokenManager::spawn(),
        shutdown: Arc::new(Notify::new()),
    };

    TestContext {
        state,
        users,
        osu,
        chat,
    }
}

/// In-process HTTP server over `state`.
pub fn test_server(state: &AppState) -> axum_test::TestServer {
    let app = transfer_api::routes::router(&state.config.ws_path).with_state(state.clone());
    axum_test::TestServer::new(app).unwrap()
}

// ---------------------------------------------------------------------------
// Streaming endpoint helpers
// ---------------------------------------------------------------------------

/// Start an actual TCP server for WebSocket testing.
pub async fn start_server(state: &AppState) -> SocketAddr {
    let app = transfer_api::routes::router(&state.config.ws_path).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Open a plugin connection with the handshake cookies.
pub async fn connect(
    addr: SocketAddr,
    username: Option<&str>,
    version: Option<&str>,
) -> Result<WsClient, tungstenite::Error> {
    let mut request = format!("ws://{addr}/osu_bot").into_client_request()?;

    let mut cookies = Vec::new();
    if let Some(name) = username {
        cookies.push(format!("transfer_target_name={name}"));
    }
    if let Some(version) = version {
        cookies.push(format!("version={version}"));
    }
    if !cookies.is_empty() {
        request.headers_mut().insert(
            "cookie",
            HeaderValue::from_str(&cookies.join("; ")).expect("valid cookie header"),
        );
    }

    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

/// Connect and consume the two greeting notices.
pub async fn connect_ready(addr: SocketAddr, username: &str, version: &str) -> WsClient {
    let mut ws = connect(addr, Some(username), Some(version))
        .await
        .expect("ws connect");
    for _ in 0..2 {
        let text = next_text(&mut ws).await;
        assert!(text.starts_with("\x01\x03\x01"), "expected notice, got {text:?}");
    }
    ws
}

/// Next non-control frame.
pub async fn next_frame(ws: &mut WsClient) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

pub async fn next_text(ws: &mut WsClient) -> String {
    match next_frame(ws).await {
        Message::Text(text) => text.to_string(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

/// Wait for a close frame and return `(code, reason)`.
pub async fn next_close(ws: &mut WsClient) -> (u16, String) {
    loop {
        match next_frame(ws).await {
            Message::Close(Some(frame)) => return (u16::from(frame.code), frame.reason.to_string()),
            Message::Close(None) => return (1005, String::new()),
            _ => continue,
        }
    }
}
