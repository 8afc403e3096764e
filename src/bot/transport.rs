//! Dual-mode OneBot WebSocket transport.
//!
//! The transport can simultaneously run an outbound client (connecting to a
//! OneBot implementation, reconnecting with exponential backoff) and an
//! inbound server (accepting connections from OneBot implementations, with
//! bearer-token authentication). Incoming frames are classified once:
//! frames with `echo` resolve a pending RPC, frames with `post_type` are
//! dispatched to the event handler in a fresh task so the frame reader never
//! blocks on command handling.

use crate::config::BotSettings;
use crate::provider::constant_time_eq;
use crate::store::SourceKind;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY_SECS: u64 = 5;
const MAX_RECONNECT_DELAY_SECS: u64 = 60;
const PING_INTERVAL_SECS: u64 = 30;
const PING_TIMEOUT_SECS: u64 = 10;
const API_TIMEOUT_SECS: u64 = 30;

/// Receives decoded OneBot events from the transport. Each event runs in its
/// own task.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: serde_json::Value);
}

type PendingMap = Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>;

pub struct BotTransport {
    settings: BotSettings,
    shutdown: CancellationToken,
    /// RPC responses in flight, keyed by echo. Inserted by `call_api`,
    /// resolved (and removed) by the frame readers, removed on timeout.
    pending_responses: PendingMap,
    /// Outgoing sender for the outbound client connection, when live.
    client_tx: RwLock<Option<mpsc::Sender<Message>>>,
    /// Outgoing senders for inbound peers, keyed by remote address.
    server_peers: RwLock<HashMap<String, mpsc::Sender<Message>>>,
}

impl BotTransport {
    pub fn new(settings: BotSettings, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            settings,
            shutdown,
            pending_responses: Mutex::new(HashMap::new()),
            client_tx: RwLock::new(None),
            server_peers: RwLock::new(HashMap::new()),
        })
    }

    /// Starts the enabled transport modes. Returns the supervisor handles so
    /// the caller can await them on shutdown.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn EventHandler>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if self.settings.ws_client_enabled {
            info!(
                "Bot client mode enabled, target: {}",
                self.settings.ws_client_url
            );
            let transport = self.clone();
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                transport.run_client(handler).await;
            }));
        }

        if self.settings.ws_server_enabled {
            info!(
                "Bot server mode enabled, listening on {}:{}",
                self.settings.ws_server_host, self.settings.ws_server_port
            );
            let transport = self.clone();
            tasks.push(tokio::spawn(async move {
                transport.run_server(handler).await;
            }));
        }

        tasks
    }

    /// Drops every outstanding RPC; their callers observe a closed channel.
    pub async fn cancel_pending(&self) {
        self.pending_responses.lock().await.clear();
    }

    /// Outbound client supervisor: connect, pump frames, reconnect with
    /// exponential backoff. The delay doubles on each attempt that never
    /// exchanged a frame, caps at 60 s and resets to 5 s after a successful
    /// exchange.
    async fn run_client(self: Arc<Self>, handler: Arc<dyn EventHandler>) {
        let mut delay = RECONNECT_DELAY_SECS;

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            let exchanged = match self.connect_once(&handler).await {
                Ok(exchanged) => exchanged,
                Err(e) => {
                    warn!("Bot client connection failed: {}", e);
                    false
                }
            };
            *self.client_tx.write().await = None;

            if self.shutdown.is_cancelled() {
                return;
            }

            if exchanged {
                delay = RECONNECT_DELAY_SECS;
            }
            crate::server::metrics::BOT_RECONNECTS.inc();
            info!("Reconnecting bot client in {} seconds", delay);
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
            }
            if !exchanged {
                delay = (delay * 2).min(MAX_RECONNECT_DELAY_SECS);
            }
        }
    }

    /// One outbound connection attempt. Returns whether any frame was
    /// exchanged before the connection ended.
    async fn connect_once(
        self: &Arc<Self>,
        handler: &Arc<dyn EventHandler>,
    ) -> anyhow::Result<bool> {
        let mut request = self.settings.ws_client_url.as_str().into_client_request()?;
        if !self.settings.ws_client_access_token.is_empty() {
            let value = format!("Bearer {}", self.settings.ws_client_access_token);
            request
                .headers_mut()
                .insert(AUTHORIZATION, HeaderValue::from_str(&value)?);
        }

        let (ws, _) = connect_async(request).await?;
        info!("Bot client connected to {}", self.settings.ws_client_url);

        let (tx, rx) = mpsc::channel::<Message>(32);
        *self.client_tx.write().await = Some(tx);

        let exchanged = self.pump_connection(ws, rx, handler).await;
        info!("Bot client connection closed");
        Ok(exchanged)
    }

    /// Inbound server: accept upgrades, authenticate, track peers.
    async fn run_server(self: Arc<Self>, handler: Arc<dyn EventHandler>) {
        let addr = format!(
            "{}:{}",
            self.settings.ws_server_host, self.settings.ws_server_port
        );
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind bot server on {}: {}", addr, e);
                return;
            }
        };
        info!("Bot server listening on {}", addr);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let transport = self.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            transport.handle_peer(stream, peer_addr.to_string(), handler).await;
                        });
                    }
                    Err(e) => {
                        warn!("Bot server accept failed: {}", e);
                    }
                }
            }
        }
    }

    async fn handle_peer(
        self: Arc<Self>,
        stream: TcpStream,
        conn_id: String,
        handler: Arc<dyn EventHandler>,
    ) {
        let mut auth_header: Option<String> = None;
        let callback = |req: &Request, response: Response| {
            auth_header = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            Ok(response)
        };

        let mut ws = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {}: {}", conn_id, e);
                return;
            }
        };

        if !self.settings.ws_server_access_token.is_empty() {
            let presented = auth_header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .unwrap_or("");
            if !constant_time_eq(presented, &self.settings.ws_server_access_token) {
                warn!("Rejecting bot peer {} with invalid access token", conn_id);
                let frame = CloseFrame {
                    code: CloseCode::Library(4001),
                    reason: "Unauthorized".into(),
                };
                let _ = ws.send(Message::Close(Some(frame))).await;
                return;
            }
        }

        info!("Bot peer connected: {}", conn_id);
        let (tx, rx) = mpsc::channel::<Message>(32);
        self.server_peers
            .write()
            .await
            .insert(conn_id.clone(), tx);

        self.pump_connection(ws, rx, &handler).await;

        self.server_peers.write().await.remove(&conn_id);
        info!("Bot peer disconnected: {}", conn_id);
    }

    /// Shared read/write loop for one connection. Frames from the peer are
    /// read in order; events are dispatched into fresh tasks. Returns whether
    /// a text frame was exchanged.
    async fn pump_connection<S>(
        &self,
        ws: tokio_tungstenite::WebSocketStream<S>,
        mut outgoing: mpsc::Receiver<Message>,
        handler: &Arc<dyn EventHandler>,
    ) -> bool
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();
        let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so pings start after the
        // interval.
        ping.tick().await;

        let mut last_rx = Instant::now();
        let mut exchanged = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                maybe = outgoing.recv() => match maybe {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                        exchanged = true;
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if last_rx.elapsed()
                        > Duration::from_secs(PING_INTERVAL_SECS + PING_TIMEOUT_SECS)
                    {
                        warn!("Bot connection ping timeout");
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(msg)) => {
                        last_rx = Instant::now();
                        match msg {
                            Message::Text(text) => {
                                exchanged = true;
                                self.handle_frame(text.as_str(), handler).await;
                            }
                            Message::Close(_) => break,
                            // Pings are answered by the protocol layer.
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Bot connection error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }

        exchanged
    }

    /// Classifies one text frame: RPC response or event.
    async fn handle_frame(&self, raw: &str, handler: &Arc<dyn EventHandler>) {
        let data: serde_json::Value = match serde_json::from_str(raw) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to parse bot frame as JSON: {}", e);
                return;
            }
        };

        let echo = data
            .get("echo")
            .and_then(|v| v.as_str())
            .map(String::from);
        if let Some(echo) = echo {
            let mut pending = self.pending_responses.lock().await;
            if let Some(tx) = pending.remove(&echo) {
                let _ = tx.send(data);
            } else {
                debug!("Dropping response with unknown echo {}", echo);
            }
            return;
        }

        if data.get("post_type").is_some() {
            // Never block the frame reader on a handler.
            let handler = handler.clone();
            tokio::spawn(async move {
                handler.handle_event(data).await;
            });
        }
    }

    /// Sends a chat message through whichever connection is available.
    pub async fn send_message(
        &self,
        kind: SourceKind,
        target_id: i64,
        message: &str,
    ) -> Option<serde_json::Value> {
        match kind {
            SourceKind::Group => {
                self.call_api(
                    "send_group_msg",
                    serde_json::json!({
                        "group_id": target_id,
                        "message": message,
                        "auto_escape": false,
                    }),
                )
                .await
            }
            SourceKind::Private => {
                self.call_api(
                    "send_private_msg",
                    serde_json::json!({
                        "user_id": target_id,
                        "message": message,
                        "auto_escape": false,
                    }),
                )
                .await
            }
        }
    }

    /// OneBot RPC: sends `{action, params, echo}` and awaits the response
    /// frame carrying the same echo. Prefers the outbound connection, falls
    /// back to inbound peers. Returns None on timeout or when no connection
    /// is available.
    pub async fn call_api(
        &self,
        action: &str,
        params: serde_json::Value,
    ) -> Option<serde_json::Value> {
        let echo = format!(
            "{}_{}",
            action,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let request = serde_json::json!({
            "action": action,
            "params": params,
            "echo": echo,
        });
        let message = Message::Text(request.to_string().into());

        let (tx, rx) = oneshot::channel();
        self.pending_responses
            .lock()
            .await
            .insert(echo.clone(), tx);

        let mut sent = false;
        if let Some(client) = self.client_tx.read().await.clone() {
            sent = client.send(message.clone()).await.is_ok();
        }
        if !sent {
            let peers: Vec<(String, mpsc::Sender<Message>)> = self
                .server_peers
                .read()
                .await
                .iter()
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect();
            for (conn_id, peer) in peers {
                if peer.send(message.clone()).await.is_ok() {
                    sent = true;
                    break;
                }
                warn!("Failed to send API request to bot peer {}", conn_id);
            }
        }

        if !sent {
            error!("No bot connection available for API call {}", action);
            self.pending_responses.lock().await.remove(&echo);
            return None;
        }

        match tokio::time::timeout(Duration::from_secs(API_TIMEOUT_SECS), rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => {
                // Sender dropped: transport shut down.
                None
            }
            Err(_) => {
                error!("Bot API call timed out: {}", action);
                self.pending_responses.lock().await.remove(&echo);
                None
            }
        }
    }
}
