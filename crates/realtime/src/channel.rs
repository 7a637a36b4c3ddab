//! The push channel: one persistent WebSocket per authenticated session.
//!
//! [`TransportChannel`] opens the socket, runs the heartbeat, parses inbound
//! frames and hands them to a single registered [`FrameHandler`]. Its
//! [`ConnectionState`] is published on a `watch` channel so UI indicators
//! and the session can follow it.
//!
//! The channel never reconnects on its own. When the socket drops the state
//! becomes [`ConnectionState::Disconnected`] and the caller decides whether
//! and when to call [`reconnect`](crate::reconnect::reconnect).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ChannelError, PushClient, WsStream};
use crate::messages::{parse_frame, PushFrame};

/// How long [`TransportChannel::disconnect`] waits for the read loop.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest heartbeat interval or timeout the read loop accepts.
pub const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`TransportChannel::disconnect`] was called.
    Requested,
    /// The server closed the socket or the stream ended.
    Closed,
    /// Nothing was received within the heartbeat timeout.
    HeartbeatTimeout,
    /// A read or write failed.
    Error,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Heartbeat tuning.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between `{"type":"ping"}` frames.
    pub interval: Duration,
    /// Silence after which the connection counts as dropped.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Raise both periods to at least [`MIN_HEARTBEAT_PERIOD`].
    pub fn clamped(self) -> Self {
        Self {
            interval: self.interval.max(MIN_HEARTBEAT_PERIOD),
            timeout: self.timeout.max(MIN_HEARTBEAT_PERIOD),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame handler
// ---------------------------------------------------------------------------

/// Downstream consumer of parsed inbound frames.
///
/// Called from the channel's read loop, one frame at a time, in arrival
/// order. Heartbeat replies are never passed on.
#[async_trait::async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle_frame(&self, frame: PushFrame);
}

// ---------------------------------------------------------------------------
// TransportChannel
// ---------------------------------------------------------------------------

/// State shared between the channel handle and its read loop task.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    /// Incremented per connection so a stale read loop cannot clobber the
    /// state of a newer one.
    generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Handle to the read loop of the current connection.
struct ActiveConnection {
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<DisconnectReason>,
}

/// One persistent bidirectional connection to the push endpoint.
///
/// Owned by the session and shared as `Arc<TransportChannel>`.
pub struct TransportChannel {
    client: PushClient,
    heartbeat: HeartbeatConfig,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveConnection>>,
}

impl TransportChannel {
    /// Periods below [`MIN_HEARTBEAT_PERIOD`] are raised to it.
    pub fn new(client: PushClient, heartbeat: HeartbeatConfig) -> Self {
        let clamped = heartbeat.clamped();
        if clamped.interval != heartbeat.interval || clamped.timeout != heartbeat.timeout {
            tracing::warn!(
                interval_ms = heartbeat.interval.as_millis() as u64,
                timeout_ms = heartbeat.timeout.as_millis() as u64,
                "Heartbeat period too short, clamping",
            );
        }
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client,
            heartbeat: clamped,
            shared: Arc::new(Shared {
                state_tx,
                handler: RwLock::new(None),
                outbound: RwLock::new(None),
                generation: AtomicU64::new(0),
            }),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe `disconnected -> connecting -> connected -> disconnected`.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Register the single downstream consumer, replacing any earlier one.
    pub async fn on_frame(&self, handler: Arc<dyn FrameHandler>) {
        *self.shared.handler.write().await = Some(handler);
    }

    /// Open the channel.
    ///
    /// A missing or blank `credential` means the user is not logged in yet:
    /// this is logged and returns `Ok(())` with the channel still
    /// disconnected. Calling `connect` while already connected is a no-op.
    pub async fn connect(&self, credential: Option<&str>) -> Result<(), ChannelError> {
        let Some(token) = credential.map(str::trim).filter(|t| !t.is_empty()) else {
            tracing::info!("No credential available, push channel stays disconnected");
            return Ok(());
        };

        let mut active = self.active.lock().await;
        if self.state() == ConnectionState::Connected && active.is_some() {
            tracing::debug!("Push channel already connected");
            return Ok(());
        }
        // Drop whatever is left of a previous connection.
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
        }

        self.shared.set_state(ConnectionState::Connecting);
        let ws_stream = match self.client.connect(token).await {
            Ok(ws) => ws,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.shared.outbound.write().await = Some(out_tx);
        self.shared.set_state(ConnectionState::Connected);

        let cancel = CancellationToken::new();
        let task_handle = tokio::spawn(run_connection(
            ws_stream,
            out_rx,
            Arc::clone(&self.shared),
            self.heartbeat,
            cancel.clone(),
            generation,
        ));

        *active = Some(ActiveConnection {
            cancel,
            task_handle,
        });
        Ok(())
    }

    /// Queue a frame for sending.
    ///
    /// Returns `false` (and sends nothing) unless the channel is connected.
    pub async fn send(&self, frame: &PushFrame) -> bool {
        if !self.is_connected() {
            tracing::debug!(frame_type = %frame.frame_type, "Push channel not connected, frame not sent");
            return false;
        }
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize outbound frame");
                return false;
            }
        };
        match self.shared.outbound.read().await.as_ref() {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    /// Tear down the connection (logout). Safe to call when disconnected.
    pub async fn disconnect(&self) {
        let previous = self.active.lock().await.take();
        if let Some(conn) = previous {
            conn.cancel.cancel();
            match tokio::time::timeout(DISCONNECT_TIMEOUT, conn.task_handle).await {
                Ok(Ok(reason)) => tracing::info!(?reason, "Push channel closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Push channel task failed"),
                Err(_) => tracing::warn!("Timed out waiting for push channel to close"),
            }
        }
        *self.shared.outbound.write().await = None;
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

/// Pump one connection until it closes, times out or is cancelled.
async fn run_connection(
    ws_stream: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
    generation: u64,
) -> DisconnectReason {
    let (mut sink, mut stream) = ws_stream.split();

    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    let mut last_seen = Instant::now();

    let ping = match PushFrame::ping().to_json() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build heartbeat frame");
            return finish(&shared, generation, DisconnectReason::Error);
        }
    };

    let reason = loop {
        let deadline = last_seen + heartbeat.timeout;

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break DisconnectReason::Requested;
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    timeout_secs = heartbeat.timeout.as_secs(),
                    "Push channel heartbeat timeout",
                );
                break DisconnectReason::HeartbeatTimeout;
            }
            _ = ticker.tick() => {
                tracing::trace!("Push channel heartbeat ping");
                if let Err(e) = sink.send(Message::Text(ping.clone())).await {
                    tracing::warn!(error = %e, "Failed to send heartbeat");
                    break DisconnectReason::Error;
                }
            }
            Some(msg) = out_rx.recv() => {
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!(error = %e, "Failed to send frame");
                    break DisconnectReason::Error;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    handle_text(&text, &shared).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {
                    last_seen = Instant::now();
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Push channel closed by server");
                    break DisconnectReason::Closed;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Push channel receive error");
                    break DisconnectReason::Error;
                }
                None => break DisconnectReason::Closed,
            },
        }
    };

    finish(&shared, generation, reason)
}

fn finish(shared: &Shared, generation: u64, reason: DisconnectReason) -> DisconnectReason {
    if shared.generation.load(Ordering::SeqCst) == generation {
        if reason != DisconnectReason::Requested {
            tracing::warn!(?reason, "Push channel dropped");
        }
        shared.set_state(ConnectionState::Disconnected);
    }
    reason
}

/// Parse one text frame and forward it to the registered handler.
async fn handle_text(text: &str, shared: &Shared) {
    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, raw_message = %text, "Failed to parse push frame");
            return;
        }
    };

    if frame.is_pong() {
        tracing::trace!("Heartbeat pong");
        return;
    }

    let handler = shared.handler.read().await.clone();
    match handler {
        Some(handler) => handler.handle_frame(frame).await,
        None => tracing::debug!(frame_type = %frame.frame_type, "No frame handler registered, dropping frame"),
    }
}
