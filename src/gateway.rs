//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection:
//!   - connect → receive HELLO → send IDENTIFY → wait for READY
//!   - background heartbeat task with ACK latency tracking
//!   - sequence number + session_id tracking
//!   - reconnect + RESUME when an established socket drops
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The session layer consumes a [`TransportHandle`] through the
//! [`Transport`] trait and never touches `tokio_tungstenite` directly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BotError;
use crate::events::GatewayEvent;
use crate::types::{GatewayPayload, ReadyEvent};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS is the only intent slash commands need.
pub const GUILDS_INTENT: u32 = 1;

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: u32 = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

/// Reconnect attempts after an established socket drops.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// What the gateway needs to authenticate.
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A live, authenticated gateway connection.
pub struct TransportHandle {
    /// The READY payload that completed the handshake.
    pub ready: ReadyEvent,
    /// Inbound events. Closing the receiver stops delivery immediately.
    pub events: async_channel::Receiver<GatewayEvent>,
    /// Outbound gateway payloads (presence updates and the like).
    pub commands: mpsc::Sender<serde_json::Value>,
    /// Cancels the background driver.
    pub shutdown: CancellationToken,
    /// Background driver, if the transport runs one.
    pub driver: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Close the event stream, then stop the driver and wait for it.
    pub async fn close(self) {
        self.events.close();
        self.shutdown.cancel();
        if let Some(driver) = self.driver {
            let abort = driver.abort_handle();
            match tokio::time::timeout(CLOSE_TIMEOUT, driver).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "gateway driver ended abnormally"),
                Err(_) => {
                    warn!("gateway driver did not stop in time, aborting");
                    abort.abort();
                }
            }
        }
    }
}

/// Opens authenticated gateway connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, credentials: &Credentials) -> Result<TransportHandle, BotError>;
}

/// Most recent heartbeat round-trip, shared between the driver and readers.
#[derive(Debug, Clone)]
pub struct Latency(Arc<AtomicI64>);

impl Default for Latency {
    fn default() -> Self {
        Self(Arc::new(AtomicI64::new(-1)))
    }
}

impl Latency {
    pub fn get(&self) -> Option<Duration> {
        let ms = self.0.load(Ordering::Relaxed);
        (ms >= 0).then(|| Duration::from_millis(ms as u64))
    }

    pub fn record(&self, rtt: Duration) {
        self.0.store(rtt.as_millis() as i64, Ordering::Relaxed);
    }
}

/// Options for connecting to the Discord gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    /// Gateway intents bitmask.
    pub intents: u32,
    /// Optional shard info: `[shard_id, num_shards]`.
    pub shard: Option<[u32; 2]>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            intents: GUILDS_INTENT,
            shard: None,
        }
    }
}

/// The production [`Transport`]: a Discord gateway WebSocket.
#[derive(Debug, Clone)]
pub struct DiscordTransport {
    config: GatewayConfig,
    latency: Latency,
}

impl DiscordTransport {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            latency: Latency::default(),
        }
    }

    /// Handle onto the heartbeat latency of the current connection.
    pub fn latency(&self) -> Latency {
        self.latency.clone()
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn open(&self, credentials: &Credentials) -> Result<TransportHandle, BotError> {
        let mut link = establish(&self.config.url)
            .await
            .map_err(BotError::Network)?;
        info!(interval_ms = link.heartbeat_interval, "received HELLO");

        let identify = identify_payload(credentials.token(), &self.config);
        rate_limited_send(&link.write, &link.limiter, &identify)
            .await
            .map_err(BotError::Network)?;
        info!("sent IDENTIFY");

        let resume = Arc::new(Mutex::new(ResumeState::default()));
        let ready = await_ready(&mut link, &resume).await?;
        info!(
            session_id = %ready.session_id,
            user = %ready.user.username,
            "gateway READY"
        );

        let (event_tx, event_rx) = async_channel::bounded(EVENT_BUFFER);
        let (send_tx, send_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            config: self.config.clone(),
            token: credentials.token().to_string(),
            resume,
            event_tx,
            send_rx,
            shutdown: shutdown.clone(),
            latency: self.latency.clone(),
        };

        Ok(TransportHandle {
            ready,
            events: event_rx,
            commands: send_tx,
            shutdown,
            driver: Some(tokio::spawn(driver.run(link))),
        })
    }
}

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window rate limiter for outbound gateway messages.
struct SendRateLimiter {
    timestamps: Vec<Instant>,
    budget: u32,
    window: Duration,
}

impl SendRateLimiter {
    fn new(budget: u32, window: Duration) -> Self {
        Self {
            timestamps: Vec::with_capacity(budget as usize),
            budget,
            window,
        }
    }

    /// How long the caller should wait before sending, or `None` if it can
    /// send immediately. Does **not** record the send.
    fn delay(&self) -> Option<Duration> {
        let now = Instant::now();
        let in_window: Vec<Instant> = self
            .timestamps
            .iter()
            .copied()
            .filter(|&t| now.duration_since(t) < self.window)
            .collect();

        if (in_window.len() as u32) < self.budget {
            return None;
        }

        let oldest = in_window.into_iter().min()?;
        let expires_at = oldest + self.window;
        (expires_at > now).then(|| expires_at - now)
    }

    /// Record a send at the current instant and prune old entries.
    fn record(&mut self) {
        let now = Instant::now();
        self.timestamps
            .retain(|&t| now.duration_since(t) < self.window);
        self.timestamps.push(now);
    }
}

// ---------------------------------------------------------------------------
// Connection internals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct ResumeState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// One WebSocket connection after HELLO.
struct Link {
    write: Arc<Mutex<WsSink>>,
    read: WsStream,
    limiter: Arc<Mutex<SendRateLimiter>>,
    heartbeat_interval: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum DisconnectReason {
    ShouldResume,
    ShouldReidentify,
    Fatal,
    EventChannelClosed,
    Cancelled,
}

/// Append the version/encoding query if a resume URL lacks it.
fn gateway_url(url: &str) -> String {
    if url.contains("v=10") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&v=10&encoding=json", url)
    } else {
        format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
    }
}

/// Open the socket and read HELLO.
async fn establish(url: &str) -> Result<Link, String> {
    let url = gateway_url(url);
    info!(url = %url, "connecting to Discord gateway");

    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| format!("failed to connect to gateway: {}", e))?;
    let (write, mut read) = ws_stream.split();

    let heartbeat_interval = read_hello(&mut read).await?;

    Ok(Link {
        write: Arc::new(Mutex::new(write)),
        read,
        limiter: Arc::new(Mutex::new(SendRateLimiter::new(
            SEND_BUDGET_MAX,
            SEND_BUDGET_WINDOW,
        ))),
        heartbeat_interval,
    })
}

async fn read_hello(stream: &mut WsStream) -> Result<u64, String> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .map_err(|_| "timed out waiting for HELLO".to_string())?
        .ok_or_else(|| "stream ended before HELLO".to_string())?
        .map_err(|e| format!("WS error reading HELLO: {}", e))?;

    let text = match msg {
        WsMessage::Text(t) => t,
        other => return Err(format!("expected text message for HELLO, got {:?}", other)),
    };

    let payload: GatewayPayload =
        serde_json::from_str(&text).map_err(|e| format!("failed to parse HELLO: {}", e))?;

    match GatewayEvent::from_payload(payload) {
        GatewayEvent::Hello { heartbeat_interval } => Ok(heartbeat_interval),
        other => Err(format!("expected HELLO, got {:?}", other)),
    }
}

fn identify_payload(token: &str, config: &GatewayConfig) -> serde_json::Value {
    let mut identify = json!({
        "op": 2,
        "d": {
            "token": token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "habit-bot",
                "device": "habit-bot"
            },
            "intents": config.intents,
        }
    });
    if let Some(shard) = config.shard {
        identify["d"]["shard"] = json!([shard[0], shard[1]]);
    }
    identify
}

fn resume_payload(token: &str, session_id: &str, sequence: u64) -> serde_json::Value {
    json!({
        "op": 6,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": sequence,
        }
    })
}

/// Read until READY. Rejections during IDENTIFY are authentication errors,
/// anything else that ends the socket is a network error.
async fn await_ready(
    link: &mut Link,
    resume: &Arc<Mutex<ResumeState>>,
) -> Result<ReadyEvent, BotError> {
    loop {
        let msg = match link.read.next().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => return Err(BotError::Network(format!("WebSocket read error: {}", e))),
            None => return Err(BotError::Network("stream ended before READY".to_string())),
        };

        match msg {
            WsMessage::Text(text) => {
                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to parse gateway payload");
                        continue;
                    }
                };
                if let Some(s) = payload.s {
                    resume.lock().await.sequence = Some(s);
                }

                match GatewayEvent::from_payload(payload) {
                    GatewayEvent::Ready(ready) => {
                        let mut r = resume.lock().await;
                        r.session_id = Some(ready.session_id.clone());
                        r.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                        return Ok(ready);
                    }
                    GatewayEvent::InvalidSession(false) => {
                        return Err(BotError::Authentication(
                            "session invalidated during IDENTIFY".to_string(),
                        ));
                    }
                    GatewayEvent::InvalidSession(true) => {
                        return Err(BotError::Network(
                            "gateway asked to retry IDENTIFY".to_string(),
                        ));
                    }
                    GatewayEvent::HeartbeatRequest => {
                        let seq = resume.lock().await.sequence;
                        let heartbeat = json!({"op": 1, "d": seq});
                        rate_limited_send(&link.write, &link.limiter, &heartbeat)
                            .await
                            .map_err(BotError::Network)?;
                    }
                    _ => {}
                }
            }
            WsMessage::Close(frame) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                return Err(match code {
                    Some(4004) => BotError::Authentication("invalid token (close 4004)".to_string()),
                    Some(c @ (4013 | 4014)) => {
                        BotError::Authentication(format!("intents not allowed (close {})", c))
                    }
                    other => BotError::Network(format!("closed before READY (code {:?})", other)),
                });
            }
            _ => {}
        }
    }
}

/// What to do after the server closed the socket with `code`.
fn close_code_reason(code: u16) -> DisconnectReason {
    match code {
        // Authentication failed, invalid shard, sharding required,
        // invalid API version, invalid or disallowed intents.
        4004 | 4010..=4014 => DisconnectReason::Fatal,
        // Invalid seq or session timed out.
        4007 | 4009 => DisconnectReason::ShouldReidentify,
        _ => DisconnectReason::ShouldResume,
    }
}

// ---------------------------------------------------------------------------
// The driver (runs in a spawned task)
// ---------------------------------------------------------------------------

struct Driver {
    config: GatewayConfig,
    token: String,
    resume: Arc<Mutex<ResumeState>>,
    event_tx: async_channel::Sender<GatewayEvent>,
    send_rx: mpsc::Receiver<serde_json::Value>,
    shutdown: CancellationToken,
    latency: Latency,
}

impl Driver {
    async fn run(mut self, mut link: Link) {
        let mut reconnect_attempts: u32 = 0;

        loop {
            let reason = self.serve(&mut link).await;

            match reason {
                DisconnectReason::Cancelled => {
                    info!("gateway driver cancelled");
                    break;
                }
                DisconnectReason::EventChannelClosed => {
                    info!("event channel closed, shutting down gateway driver");
                    break;
                }
                DisconnectReason::Fatal => {
                    error!("fatal gateway error, shutting down");
                    break;
                }
                DisconnectReason::ShouldReidentify => {
                    info!("session invalidated, will re-IDENTIFY");
                    let mut r = self.resume.lock().await;
                    r.session_id = None;
                    r.sequence = None;
                }
                DisconnectReason::ShouldResume => info!("will attempt RESUME"),
            }

            link = loop {
                reconnect_attempts += 1;
                if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
                    error!("exceeded max reconnect attempts, giving up");
                    self.event_tx.close();
                    return;
                }

                let backoff = backoff_delay(reconnect_attempts);
                warn!(
                    delay_ms = backoff.as_millis() as u64,
                    attempt = reconnect_attempts,
                    "reconnecting after backoff"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = self.shutdown.cancelled() => {
                        self.event_tx.close();
                        return;
                    }
                }

                match self.reconnect().await {
                    Ok(link) => {
                        reconnect_attempts = 0;
                        break link;
                    }
                    Err(e) => warn!(error = %e, "reconnect failed"),
                }
            };
        }

        self.event_tx.close();
    }

    /// Open a fresh socket and RESUME, or IDENTIFY if there is nothing to
    /// resume. READY / RESUMED arrive later through the read loop.
    async fn reconnect(&self) -> Result<Link, String> {
        let snapshot = self.resume.lock().await.clone();
        let url = snapshot
            .resume_gateway_url
            .clone()
            .unwrap_or_else(|| self.config.url.clone());

        let link = establish(&url).await?;

        let payload = match (&snapshot.session_id, snapshot.sequence) {
            (Some(session_id), Some(seq)) => {
                info!("sending RESUME");
                resume_payload(&self.token, session_id, seq)
            }
            _ => {
                info!("sending IDENTIFY");
                identify_payload(&self.token, &self.config)
            }
        };
        rate_limited_send(&link.write, &link.limiter, &payload).await?;
        Ok(link)
    }

    /// Heartbeat and read one connection until it ends.
    async fn serve(&mut self, link: &mut Link) -> DisconnectReason {
        let heartbeat_sent: Arc<std::sync::Mutex<Option<Instant>>> = Arc::default();
        let hb_cancel = self.shutdown.child_token();
        let heartbeat_handle = tokio::spawn(heartbeat(
            Arc::clone(&link.write),
            Arc::clone(&link.limiter),
            Arc::clone(&self.resume),
            Arc::clone(&heartbeat_sent),
            link.heartbeat_interval,
            hb_cancel.clone(),
        ));

        let reason = self.read_loop(link, &heartbeat_sent).await;

        hb_cancel.cancel();
        if let Err(e) = heartbeat_handle.await {
            warn!(error = %e, "heartbeat task ended abnormally");
        }

        // 1000 ends the session on Discord's side; anything else keeps it
        // resumable.
        let frame = match reason {
            DisconnectReason::ShouldResume => CloseFrame {
                code: CloseCode::from(4000),
                reason: "resuming".into(),
            },
            _ => CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            },
        };
        let mut w = link.write.lock().await;
        let _ = w.send(WsMessage::Close(Some(frame))).await;

        reason
    }

    async fn read_loop(
        &mut self,
        link: &mut Link,
        heartbeat_sent: &std::sync::Mutex<Option<Instant>>,
    ) -> DisconnectReason {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => return DisconnectReason::Cancelled,

                // Outbound sends from the session (e.g. presence updates).
                Some(payload) = self.send_rx.recv() => {
                    if let Err(e) = rate_limited_send(&link.write, &link.limiter, &payload).await {
                        warn!(error = %e, "failed to send payload on gateway");
                    }
                }

                msg = link.read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read error");
                            return DisconnectReason::ShouldResume;
                        }
                        None => {
                            info!("WebSocket stream ended");
                            return DisconnectReason::ShouldResume;
                        }
                    };

                    match msg {
                        WsMessage::Text(text) => {
                            let payload: GatewayPayload = match serde_json::from_str(&text) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, "failed to parse gateway payload");
                                    continue;
                                }
                            };

                            if let Some(s) = payload.s {
                                self.resume.lock().await.sequence = Some(s);
                            }

                            let event = GatewayEvent::from_payload(payload);

                            match &event {
                                GatewayEvent::Ready(ready) => {
                                    let mut r = self.resume.lock().await;
                                    r.session_id = Some(ready.session_id.clone());
                                    r.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                                    info!(session_id = %ready.session_id, "gateway READY");
                                }
                                GatewayEvent::Resumed => info!("gateway RESUMED"),
                                GatewayEvent::HeartbeatRequest => {
                                    let seq = self.resume.lock().await.sequence;
                                    let heartbeat = json!({"op": 1, "d": seq});
                                    if let Err(e) = rate_limited_send(&link.write, &link.limiter, &heartbeat).await {
                                        warn!(error = %e, "failed to send requested heartbeat");
                                    }
                                    continue;
                                }
                                GatewayEvent::HeartbeatAck => {
                                    let sent = heartbeat_sent
                                        .lock()
                                        .unwrap_or_else(|e| e.into_inner())
                                        .take();
                                    if let Some(sent) = sent {
                                        let rtt = sent.elapsed();
                                        self.latency.record(rtt);
                                        debug!(rtt_ms = rtt.as_millis() as u64, "heartbeat acknowledged");
                                    }
                                    continue;
                                }
                                GatewayEvent::Hello { .. } => continue,
                                GatewayEvent::Reconnect => {
                                    info!("gateway requested reconnect (op 7)");
                                    return DisconnectReason::ShouldResume;
                                }
                                GatewayEvent::InvalidSession(resumable) => {
                                    warn!(resumable, "session invalidated (op 9)");
                                    tokio::time::sleep(Duration::from_secs(2)).await;
                                    return if *resumable {
                                        DisconnectReason::ShouldResume
                                    } else {
                                        DisconnectReason::ShouldReidentify
                                    };
                                }
                                GatewayEvent::InteractionCreate(_) | GatewayEvent::Unknown { .. } => {}
                            }

                            if self.event_tx.send(event).await.is_err() {
                                return DisconnectReason::EventChannelClosed;
                            }
                        }

                        WsMessage::Close(frame) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            warn!(close_code = ?code, "WebSocket closed by server");
                            return code.map(close_code_reason).unwrap_or(DisconnectReason::ShouldResume);
                        }

                        // Ping/Pong/Binary are ignored.
                        _ => {}
                    }
                }
            }
        }
    }
}

async fn heartbeat(
    write: Arc<Mutex<WsSink>>,
    limiter: Arc<Mutex<SendRateLimiter>>,
    resume: Arc<Mutex<ResumeState>>,
    sent_at: Arc<std::sync::Mutex<Option<Instant>>>,
    interval_ms: u64,
    cancel: CancellationToken,
) {
    // Discord says the first heartbeat goes out after
    // `heartbeat_interval * jitter` where jitter ∈ [0, 1).
    let jitter = rand::random::<f64>();
    let first_delay = Duration::from_millis((interval_ms as f64 * jitter) as u64);
    tokio::select! {
        _ = tokio::time::sleep(first_delay) => {}
        _ = cancel.cancelled() => return,
    }

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let seq = resume.lock().await.sequence;
                let payload = json!({"op": 1, "d": seq});
                *sent_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                if let Err(e) = rate_limited_send(&write, &limiter, &payload).await {
                    warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
                    return;
                }
                debug!(seq = ?seq, "sent heartbeat");
            }
            _ = cancel.cancelled() => {
                debug!("heartbeat task cancelled");
                return;
            }
        }
    }
}

/// Send a JSON payload on the WebSocket, respecting the send rate limiter.
async fn rate_limited_send(
    ws_write: &Arc<Mutex<WsSink>>,
    rate_limiter: &Arc<Mutex<SendRateLimiter>>,
    payload: &serde_json::Value,
) -> Result<(), String> {
    loop {
        let delay = rate_limiter.lock().await.delay();
        match delay {
            Some(d) => {
                debug!(
                    delay_ms = d.as_millis() as u64,
                    "gateway send rate-limited, waiting"
                );
                tokio::time::sleep(d).await;
            }
            None => break,
        }
    }
    rate_limiter.lock().await.record();

    let text = serde_json::to_string(payload).map_err(|e| e.to_string())?;
    let mut w = ws_write.lock().await;
    w.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| format!("WS send error: {}", e))
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jitter.min(60_000.0) as u64)
}
