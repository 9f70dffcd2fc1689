//! Bot connection to the chat network.
//!
//! One background task owns the TCP connection: it registers, answers
//! `PING`, writes queued lines and reconnects after a fixed back-off.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{to_nick, ChatNetwork, IrcEvent, IrcLine};

const OUTBOUND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct IrcClient {
    outbound: mpsc::Sender<String>,
    presence: Arc<DashSet<String>>,
}

struct Credentials {
    server: String,
    nick: String,
    password: String,
}

impl IrcClient {
    /// Start the connection task. Inbound private messages arrive on the
    /// returned receiver.
    pub fn connect(server: &str, nick: &str, password: &str) -> (Self, mpsc::Receiver<IrcEvent>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let presence = Arc::new(DashSet::new());

        let creds = Credentials {
            server: server.to_string(),
            nick: nick.to_string(),
            password: password.to_string(),
        };
        tokio::spawn(run(creds, outbound_rx, events_tx, presence.clone()));

        (Self { outbound, presence }, events_rx)
    }
}

#[async_trait]
impl ChatNetwork for IrcClient {
    async fn send_message(&self, target: &str, text: &str) {
        let text = text.replace(['\r', '\n'], " ");
        let line = format!("PRIVMSG {} :{}\r\n", to_nick(target), text);
        if self.outbound.send(line).await.is_err() {
            tracing::warn!(%target, "chat connection task is gone, message dropped");
        }
    }

    fn is_online(&self, nick: &str) -> bool {
        self.presence.contains(&to_nick(nick).to_lowercase())
    }
}

async fn run(
    creds: Credentials,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<IrcEvent>,
    presence: Arc<DashSet<String>>,
) {
    loop {
        match TcpStream::connect(&creds.server).await {
            Ok(stream) => {
                tracing::info!(server = %creds.server, "connected to chat network");
                match serve(stream, &creds, &mut outbound, &events, &presence).await {
                    Ok(Stop::Shutdown) => break,
                    Ok(Stop::Disconnected) => {
                        tracing::warn!(server = %creds.server, "chat network closed the connection")
                    }
                    Err(err) => tracing::warn!(server = %creds.server, %err, "chat connection failed"),
                }
            }
            Err(err) => tracing::warn!(server = %creds.server, %err, "could not reach chat network"),
        }

        presence.clear();
        if events.is_closed() {
            break;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
    tracing::debug!("chat connection task stopped");
}

enum Stop {
    Disconnected,
    Shutdown,
}

async fn serve(
    stream: TcpStream,
    creds: &Credentials,
    outbound: &mut mpsc::Receiver<String>,
    events: &mpsc::Sender<IrcEvent>,
    presence: &DashSet<String>,
) -> std::io::Result<Stop> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let register = format!(
        "PASS {}\r\nNICK {}\r\nUSER {} 0 * :{}\r\n",
        creds.password, creds.nick, creds.nick, creds.nick
    );
    writer.write_all(register.as_bytes()).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(Stop::Disconnected);
                };
                let Some(line) = IrcLine::parse(&line) else {
                    continue;
                };
                if let Some(reply) = handle_line(&line, &creds.nick, events, presence).await {
                    writer.write_all(reply.as_bytes()).await?;
                }
            }
            queued = outbound.recv() => {
                let Some(queued) = queued else {
                    let _ = writer.write_all(b"QUIT :shutting down\r\n").await;
                    return Ok(Stop::Shutdown);
                };
                writer.write_all(queued.as_bytes()).await?;
            }
        }
    }
}

/// Track presence, forward private messages, and return any line that must
/// be written back immediately.
async fn handle_line(
    line: &IrcLine,
    own_nick: &str,
    events: &mpsc::Sender<IrcEvent>,
    presence: &DashSet<String>,
) -> Option<String> {
    match line.command.as_str() {
        "PING" => {
            let token = line.params.last().map(String::as_str).unwrap_or_default();
            return Some(format!("PONG :{token}\r\n"));
        }
        "001" => {
            tracing::info!("[IRC] {}", line.params.last().map(String::as_str).unwrap_or_default());
        }
        "JOIN" => {
            if let Some(nick) = line.nick() {
                presence.insert(nick.to_lowercase());
            }
        }
        "PART" | "QUIT" => {
            if let Some(nick) = line.nick() {
                presence.remove(&nick.to_lowercase());
            }
        }
        // NAMES reply: `353 <me> <type> <channel> :<nicks...>`
        "353" => {
            if let Some(names) = line.params.last() {
                for name in names.split(' ').filter(|n| !n.is_empty()) {
                    presence.insert(name.trim_start_matches(['@', '+']).to_lowercase());
                }
            }
        }
        "PRIVMSG" => {
            let nick = line.nick()?;
            if nick.eq_ignore_ascii_case(own_nick) {
                return None;
            }
            presence.insert(nick.to_lowercase());
            let text = line.params.get(1)?;
            let event = IrcEvent::Message {
                from: nick.to_string(),
                text: text.clone(),
            };
            // Never wait on the bridge here: its replies go through the
            // outbound queue this task drains.
            match events.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(%nick, "chat bridge backlogged, message dropped")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("no bridge listening, chat message dropped")
                }
            }
        }
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn registers_answers_ping_and_forwards_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (client, mut events) = IrcClient::connect(&addr, "bot", "secret");
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PASS secret");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "NICK bot");
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("USER bot"));

        writer.write_all(b"PING :cho.ppy.sh\r\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PONG :cho.ppy.sh");

        writer
            .write_all(b":Alice!cho@ppy.sh PRIVMSG bot :hi bot\r\n")
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(IrcEvent::Message {
                from: "Alice".into(),
                text: "hi bot".into()
            })
        );
        assert!(client.is_online("alice"));

        client.send_message("Mr Ekko", "line one\nline two").await;
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "PRIVMSG Mr_Ekko :line one line two"
        );

        writer.write_all(b":Alice!cho@ppy.sh QUIT :bye\r\n").await.unwrap();
        // Round-trip a PING so the QUIT has been processed.
        writer.write_all(b"PING :x\r\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PONG :x");
        assert!(!client.is_online("alice"));
    }

    #[tokio::test]
    async fn backlogged_bridge_does_not_stall_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Nobody drains the events while the flood arrives.
        let (client, _events) = IrcClient::connect(&addr, "bot", "secret");
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        for _ in 0..3 {
            lines.next_line().await.unwrap().unwrap();
        }

        let flood: String = (0..EVENT_CAPACITY + 44)
            .map(|i| format!(":Alice!cho@ppy.sh PRIVMSG bot :line {i}\r\n"))
            .collect();
        writer.write_all(flood.as_bytes()).await.unwrap();
        writer.write_all(b"PING :still-here\r\n").await.unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("connection task stalled")
            .unwrap()
            .unwrap();
        assert_eq!(pong, "PONG :still-here");

        client.send_message("alice", "reply").await;
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "PRIVMSG alice :reply");
    }

    #[tokio::test]
    async fn full_event_queue_drops_instead_of_waiting() {
        let presence = DashSet::new();
        let (tx, mut rx) = mpsc::channel(1);
        let line = IrcLine::parse(":Alice!cho@ppy.sh PRIVMSG bot :one").unwrap();
        assert_eq!(handle_line(&line, "bot", &tx, &presence).await, None);

        let line = IrcLine::parse(":Alice!cho@ppy.sh PRIVMSG bot :two").unwrap();
        let handled =
            tokio::time::timeout(Duration::from_secs(1), handle_line(&line, "bot", &tx, &presence))
                .await;
        assert_eq!(handled, Ok(None));

        assert_eq!(
            rx.recv().await,
            Some(IrcEvent::Message {
                from: "Alice".into(),
                text: "one".into()
            })
        );
    }

    #[tokio::test]
    async fn own_messages_are_not_forwarded() {
        let presence = DashSet::new();
        let (tx, mut rx) = mpsc::channel(1);
        let line = IrcLine::parse(":BOT!cho@ppy.sh PRIVMSG alice :echo").unwrap();

        assert_eq!(handle_line(&line, "bot", &tx, &presence).await, None);
        drop(tx);
        assert_eq!(rx.recv().await, None);
        assert!(presence.is_empty());
    }
}
