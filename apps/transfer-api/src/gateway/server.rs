//! WebSocket upgrade handler and the two per-connection pumps.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::{self, Instant};
use transfer_common::now_millis;

use crate::error::ApiError;
use crate::models::user::{format_ban_remaining, UserRecord};
use crate::notification::{Pipeline, NOTIFICATION_PREFIX};
use crate::AppState;

use super::handshake::{normalize_username, resolve_user};
use super::protocol::{
    decode_command, normalize_line, ProtocolVersion, CLOSE_POLICY_VIOLATION, CMD_REQUEST_TOKEN,
    HEARTBEAT_ACK, HEARTBEAT_CHECK, RATE_LIMIT_WARNING, TOKEN_PROMPT,
};
use super::session::{Outbound, Session, AWAITING_REPLY, CONNECTED};

/// Largest inbound frame.
pub const MAX_MESSAGE_SIZE: usize = 512;
/// Deadline for a single outbound write.
const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Silence allowed before the peer is presumed dead.
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Must stay below [`PONG_WAIT`].
const PING_PERIOD: Duration = Duration::from_secs(54);

pub const TARGET_NAME_COOKIE: &str = "transfer_target_name";
pub const VERSION_COOKIE: &str = "version";

const DUPLICATE_SESSION_REASON: &str = "You are taken offline by a newer connection.";

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

#[derive(Debug, Error)]
enum WriteError {
    #[error("write deadline exceeded")]
    Timeout,
    #[error(transparent)]
    Ws(#[from] axum::Error),
}

pub fn router(ws_path: &str) -> Router<AppState> {
    Router::new().route(ws_path, get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let username = cookie(&headers, TARGET_NAME_COOKIE)
        .map(|raw| normalize_username(&raw))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("transfer_target_name cookie is required"))?;
    let version: ProtocolVersion = cookie(&headers, VERSION_COOKIE)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    let user = resolve_user(state.users.as_ref(), state.osu.as_ref(), &username).await?;

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_connection(socket, state, user, version))
        .into_response())
}

/// Value of cookie `name`, if the request carries it.
fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    user: UserRecord,
    version: ProtocolVersion,
) {
    let (mut ws_tx, ws_rx) = socket.split();

    if user.is_banned() {
        let remaining = user.ban_remaining(now_millis());
        if !remaining.is_zero() {
            let reason = format!(
                "You are restricted! {} without restrictions.",
                format_ban_remaining(remaining)
            );
            tracing::info!(username = %user.username, %reason, "rejected restricted user");
            let _ = send_close(&mut ws_tx, CLOSE_POLICY_VIOLATION, &reason).await;
            return;
        }
    }

    match state.sessions.kick(&user.username, DUPLICATE_SESSION_REASON).await {
        Ok(true) => tracing::info!(username = %user.username, "kicked previous session"),
        Ok(false) => {}
        Err(err) => {
            tracing::error!(%err, "registry unavailable");
            let _ = send_close(&mut ws_tx, CLOSE_POLICY_VIOLATION, "Server is shutting down").await;
            return;
        }
    }

    let (session, outbound) = Session::new(user, version);
    if let Err(err) = state.sessions.register(session.clone()).await {
        tracing::error!(%err, "registry unavailable");
        let _ = send_close(&mut ws_tx, CLOSE_POLICY_VIOLATION, "Server is shutting down").await;
        return;
    }

    tracing::info!(
        session_id = %session.session_id,
        username = %session.username,
        %version,
        "session connected"
    );

    session.send_notice(&state.config.welcome_message).await;
    session
        .send_notice(&format!(
            "You can send {} messages per minute",
            state.config.max_messages_per_minute
        ))
        .await;

    let (terminate_tx, terminate_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let writer = tokio::spawn(write_pump(
        session.clone(),
        ws_tx,
        outbound,
        state.config.rate_window,
        terminate_rx,
        closed_tx,
    ));

    read_pump(&state, &session, ws_rx, closed_rx).await;

    let _ = terminate_tx.send(());
    if let Err(err) = writer.await {
        tracing::error!(session_id = %session.session_id, %err, "outbound pump panicked");
    }

    session.clear_flag(CONNECTED);
    state.sessions.unregister(&session).await;
    state.tokens.revoke(&session.session_id).await;

    tracing::info!(
        session_id = %session.session_id,
        username = %session.username,
        "session ended"
    );
}

/// Inbound pump. Returns when the peer goes away, a read fails or times
/// out, or the outbound pump has stopped.
async fn read_pump(
    state: &AppState,
    session: &Arc<Session>,
    mut ws_rx: WsStream,
    mut writer_closed: watch::Receiver<bool>,
) {
    let mut deadline = Instant::now() + PONG_WAIT;

    loop {
        let next = tokio::select! {
            next = time::timeout_at(deadline, ws_rx.next()) => next,
            _ = writer_closed.changed() => break,
        };

        let msg = match next {
            Err(_) => {
                tracing::debug!(session_id = %session.session_id, "read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(session_id = %session.session_id, ?err, "ws read error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                if text.as_str().starts_with(HEARTBEAT_CHECK) {
                    deadline = Instant::now() + PONG_WAIT;
                    session.send_text(HEARTBEAT_ACK).await;
                    continue;
                }
                handle_text(state, session, text.as_str()).await;
            }
            Message::Binary(frame) => handle_binary(state, session, &frame).await,
            Message::Pong(_) => deadline = Instant::now() + PONG_WAIT,
            Message::Ping(_) => {}
            Message::Close(_) => break,
        }
    }
}

async fn handle_text(state: &AppState, session: &Arc<Session>, text: &str) {
    if !session.try_consume_message(state.config.max_messages_per_minute) {
        session.send_text(RATE_LIMIT_WARNING).await;
        return;
    }

    let line = normalize_line(text);
    if line.is_empty() {
        return;
    }

    if line.starts_with(NOTIFICATION_PREFIX) {
        let pipeline = Pipeline {
            osu: state.osu.clone(),
            users: state.users.clone(),
            chat: state.chat.clone(),
        };
        let session = session.clone();
        tokio::spawn(async move { pipeline.process(&session, line).await });
        return;
    }

    tracing::info!(username = %session.username, "[WS -> IRC] {line}");
    state.chat.send_message(&session.username, &line).await;
}

async fn handle_binary(state: &AppState, session: &Arc<Session>, frame: &[u8]) {
    match decode_command(frame) {
        Some(CMD_REQUEST_TOKEN) => {
            if !session.try_set_flag(AWAITING_REPLY) {
                return;
            }
            state.chat.send_message(&session.username, TOKEN_PROMPT).await;

            let session = session.clone();
            let window = state.config.token_reply_window;
            tokio::spawn(async move {
                time::sleep(window).await;
                session.clear_flag(AWAITING_REPLY);
            });
        }
        Some(cmd) => {
            tracing::debug!(session_id = %session.session_id, cmd, "ignoring unknown command")
        }
        None => tracing::debug!(session_id = %session.session_id, "ignoring short binary frame"),
    }
}

/// Outbound pump: the only writer of the transport, and the place that
/// closes it.
async fn write_pump(
    session: Arc<Session>,
    mut ws_tx: WsSink,
    mut outbound: Outbound,
    rate_window: Duration,
    mut terminate: oneshot::Receiver<()>,
    closed: watch::Sender<bool>,
) {
    let mut ping = time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    let mut rate_reset = time::interval_at(Instant::now() + rate_window, rate_window);

    loop {
        let result = tokio::select! {
            text = outbound.text.recv() => match text {
                Some(text) => write(&mut ws_tx, Message::Text(text.into())).await,
                None => {
                    let _ = send_close(&mut ws_tx, 1000, "").await;
                    break;
                }
            },
            frame = outbound.binary.recv() => match frame {
                Some(bytes) => write(&mut ws_tx, Message::Binary(bytes.into())).await,
                None => {
                    let _ = send_close(&mut ws_tx, 1000, "").await;
                    break;
                }
            },
            kicked = outbound.kick.changed() => {
                if kicked.is_err() {
                    let _ = send_close(&mut ws_tx, 1000, "").await;
                    break;
                }
                let reason = outbound.kick.borrow_and_update().clone();
                match reason {
                    Some(reason) => {
                        tracing::info!(session_id = %session.session_id, %reason, "closing session");
                        let _ = send_close(&mut ws_tx, CLOSE_POLICY_VIOLATION, &reason).await;
                        break;
                    }
                    None => Ok(()),
                }
            }
            _ = ping.tick() => write(&mut ws_tx, Message::Ping(Default::default())).await,
            _ = rate_reset.tick() => {
                session.reset_message_count();
                Ok(())
            }
            _ = &mut terminate => break,
        };

        if let Err(err) = result {
            tracing::debug!(session_id = %session.session_id, %err, "ws write failed");
            break;
        }
    }

    let _ = closed.send(true);
    let _ = time::timeout(WRITE_WAIT, ws_tx.close()).await;
}

async fn write(ws_tx: &mut WsSink, msg: Message) -> Result<(), WriteError> {
    time::timeout(WRITE_WAIT, ws_tx.send(msg))
        .await
        .map_err(|_| WriteError::Timeout)??;
    Ok(())
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), WriteError> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    write(ws_tx, close_msg).await
}
