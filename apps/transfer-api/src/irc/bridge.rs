//! Routes chat-network messages to sessions and the chat command dispatcher.

use tokio::sync::mpsc;

use crate::commands::{self, CHAT_COMMAND_PREFIX};
use crate::AppState;

use super::IrcEvent;

/// Consume inbound chat events until the chat client goes away.
pub async fn run(state: AppState, mut events: mpsc::Receiver<IrcEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            IrcEvent::Message { from, text } => handle_message(&state, &from, &text).await,
        }
    }
    tracing::debug!("chat bridge stopped");
}

pub async fn handle_message(state: &AppState, from: &str, text: &str) {
    if let Some(command) = text.strip_prefix(CHAT_COMMAND_PREFIX) {
        tracing::info!(%from, "[IRC Command] {text}");
        for reply in commands::dispatch_chat(state, from, command).await {
            state.chat.send_message(from, &reply).await;
        }
        return;
    }

    tracing::info!(%from, "[WS <- IRC] {text}");
    match state.sessions.lookup(from).await {
        Some(session) => session.send_text(text).await,
        None => tracing::warn!(%from, "{from} is offline, message dropped"),
    }
}
