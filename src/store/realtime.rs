//! Row-level change notifications over the realtime websocket.
//!
//! Speaks the Phoenix channel protocol: join a `realtime:<channel>` topic
//! with a `postgres_changes` config for one table, keep the socket alive
//! with heartbeats and forward every change to the subscriber. The listener
//! reconnects with exponential backoff until its [`Subscription`] is
//! cancelled or the subscriber goes away.

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{StoreError, Subscription};

/// Kind of row change reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change to some row of a watched table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
}

/// Connection parameters for one realtime subscription
#[derive(Debug, Clone)]
pub struct RealtimeParams {
    /// HTTP(S) base URL of the project; converted to ws(s)
    pub base_url: String,
    pub api_key: String,
    /// Latest user JWT. Read on every join; changes are pushed to a joined
    /// channel.
    pub access_token: watch::Receiver<Option<String>>,
    pub channel: String,
    pub schema: String,
    pub table: String,
}

/// Wire frame of the Phoenix channel protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

/// Initial backoff delay on connection failure
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Maximum backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(300);
/// Server drops sockets that stay silent for 60s
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Reconnect delay: starts at [`INITIAL_BACKOFF`], doubles after every
/// failed attempt up to [`MAX_BACKOFF`]
struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }

    /// Delay for this attempt; the next one waits twice as long
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

/// Build the websocket endpoint from the project's HTTP base URL
pub fn websocket_url(base_url: &str, api_key: &str) -> Result<String, StoreError> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(StoreError::InvalidUrl(
            "URL must start with http:// or https://".to_string(),
        ));
    };

    Ok(format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        ws_base,
        urlencoding::encode(api_key)
    ))
}

impl RealtimeParams {
    fn topic(&self) -> String {
        format!("realtime:{}", self.channel)
    }

    /// `phx_join` frame subscribing to every change of the table
    pub fn join_message(&self, msg_ref: u64, access_token: Option<&str>) -> PhoenixMessage {
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": self.schema, "table": self.table }
                ]
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }

        PhoenixMessage {
            topic: self.topic(),
            event: "phx_join".to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    /// Hand a refreshed JWT to an already joined channel
    fn access_token_message(&self, msg_ref: u64, access_token: &str) -> PhoenixMessage {
        PhoenixMessage {
            topic: self.topic(),
            event: "access_token".to_string(),
            payload: json!({ "access_token": access_token }),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    fn leave_message(&self, msg_ref: u64) -> PhoenixMessage {
        PhoenixMessage {
            topic: self.topic(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }
}

fn heartbeat_message(msg_ref: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
    }
}

/// Extract a change event from a `postgres_changes` frame.
///
/// Returns `None` for every other frame, and for changes on tables other
/// than `table`.
pub fn parse_change(msg: &PhoenixMessage, table: &str) -> Option<ChangeEvent> {
    if msg.event != "postgres_changes" {
        return None;
    }

    let data = msg.payload.get("data")?;
    let kind: ChangeKind = serde_json::from_value(data.get("type")?.clone()).ok()?;
    let changed_table = data
        .get("table")
        .and_then(|v| v.as_str())
        .unwrap_or(table);

    if changed_table != table {
        return None;
    }

    Some(ChangeEvent {
        kind,
        table: changed_table.to_string(),
    })
}

/// Start a realtime listener for one table.
///
/// Every change is forwarded to `on_change` with `try_send`: when the
/// subscriber's queue is full a refresh is already pending, so the event is
/// coalesced into it.
pub fn start_listener(
    params: RealtimeParams,
    on_change: mpsc::Sender<ChangeEvent>,
) -> Result<Subscription, StoreError> {
    let url = websocket_url(&params.base_url, &params.api_key)?;
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        listener_loop(url, params, on_change, shutdown_rx).await;
    });

    Ok(Subscription::new(move || {
        let _ = shutdown_tx.try_send(());
    }))
}

/// Why a single websocket session ended
enum SessionEnd {
    /// Subscription cancelled
    Shutdown,
    /// Nobody is listening for changes anymore
    SubscriberGone,
    /// Connection dropped; `joined` tells whether the channel join succeeded
    Disconnected { joined: bool },
}

async fn listener_loop(
    url: String,
    params: RealtimeParams,
    on_change: mpsc::Sender<ChangeEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut backoff = Backoff::new();

    log::info!(
        "realtime: starting listener for table {} on channel {}",
        params.table,
        params.channel,
    );

    loop {
        // Check for shutdown before (re)connecting
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => {
                log::info!("realtime: shutdown requested for table {}", params.table);
                return;
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        log::debug!("realtime: connecting for table {}", params.table);

        let reconnect_delay = match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                match run_session(ws_stream, &params, &on_change, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => {
                        log::info!("realtime: listener for table {} stopped", params.table);
                        return;
                    }
                    SessionEnd::SubscriberGone => {
                        log::info!(
                            "realtime: subscriber for table {} went away, closing",
                            params.table
                        );
                        return;
                    }
                    SessionEnd::Disconnected { joined: true } => {
                        backoff.reset();
                        backoff.next_delay()
                    }
                    SessionEnd::Disconnected { joined: false } => backoff.next_delay(),
                }
            }
            Err(e) => {
                log::error!(
                    "realtime: failed to connect for table {}: {}",
                    params.table,
                    e,
                );
                backoff.next_delay()
            }
        };

        log::warn!(
            "realtime: reconnecting in {:?} for table {}",
            reconnect_delay,
            params.table,
        );

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown_rx.recv() => {
                log::info!("realtime: shutdown during reconnect delay for table {}", params.table);
                return;
            }
        }
    }
}

async fn run_session(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    params: &RealtimeParams,
    on_change: &mpsc::Sender<ChangeEvent>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();
    let mut next_ref: u64 = 1;
    let mut joined = false;

    let mut token_rx = params.access_token.clone();
    let mut token_feed_open = true;
    let token = token_rx.borrow_and_update().clone();

    let join = params.join_message(next_ref, token.as_deref());
    next_ref += 1;
    if let Err(e) = send_frame(&mut write, &join).await {
        log::warn!("realtime: failed to send join for table {}: {}", params.table, e);
        return SessionEnd::Disconnected { joined };
    }

    let mut heartbeat = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let msg: PhoenixMessage = match serde_json::from_str(text.as_str()) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("realtime: unparseable frame ({}): {}", e, text.as_str());
                                continue;
                            }
                        };

                        match msg.event.as_str() {
                            "phx_reply" => {
                                let status = msg.payload.get("status").and_then(|v| v.as_str());
                                if status == Some("ok") {
                                    if !joined && msg.topic == params.topic() {
                                        log::info!("realtime: joined channel {}", params.channel);
                                        joined = true;
                                    }
                                } else {
                                    log::error!(
                                        "realtime: {} replied {:?}: {}",
                                        msg.topic,
                                        status,
                                        msg.payload,
                                    );
                                }
                            }
                            "phx_error" | "phx_close" => {
                                log::warn!("realtime: channel {} closed by server ({})", msg.topic, msg.event);
                                return SessionEnd::Disconnected { joined };
                            }
                            "postgres_changes" => {
                                if let Some(event) = parse_change(&msg, &params.table) {
                                    log::debug!("realtime: {:?} on {}", event.kind, event.table);
                                    match on_change.try_send(event) {
                                        Ok(()) => {}
                                        Err(mpsc::error::TrySendError::Full(_)) => {
                                            log::debug!("realtime: refresh already pending, coalescing");
                                        }
                                        Err(mpsc::error::TrySendError::Closed(_)) => {
                                            let _ = send_frame(&mut write, &params.leave_message(next_ref)).await;
                                            let _ = write.close().await;
                                            return SessionEnd::SubscriberGone;
                                        }
                                    }
                                }
                            }
                            _ => {
                                log::trace!("realtime: ignoring {} on {}", msg.event, msg.topic);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            return SessionEnd::Disconnected { joined };
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("realtime: connection closed for table {}", params.table);
                        return SessionEnd::Disconnected { joined };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("realtime: socket error for table {}: {}", params.table, e);
                        return SessionEnd::Disconnected { joined };
                    }
                }
            }
            _ = heartbeat.tick() => {
                let frame = heartbeat_message(next_ref);
                next_ref += 1;
                if let Err(e) = send_frame(&mut write, &frame).await {
                    log::warn!("realtime: heartbeat failed for table {}: {}", params.table, e);
                    return SessionEnd::Disconnected { joined };
                }
            }
            changed = token_rx.changed(), if token_feed_open => {
                if changed.is_err() {
                    // Token owner is gone; keep the current one
                    token_feed_open = false;
                    continue;
                }
                let token = token_rx.borrow_and_update().clone();
                // Not joined yet: the next join picks the new token up
                if let (true, Some(token)) = (joined, token) {
                    log::debug!("realtime: pushing refreshed token to {}", params.channel);
                    let frame = params.access_token_message(next_ref, &token);
                    next_ref += 1;
                    if let Err(e) = send_frame(&mut write, &frame).await {
                        log::warn!("realtime: token push failed for table {}: {}", params.table, e);
                        return SessionEnd::Disconnected { joined };
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = send_frame(&mut write, &params.leave_message(next_ref)).await;
                let _ = write.close().await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

async fn send_frame<W>(write: &mut W, msg: &PhoenixMessage) -> Result<(), String>
where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    let text = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}
