//! Shared fixtures: an in-memory `ClinicalApi` and an in-process push
//! server built on axum.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use medflow_core::error::CoreError;
use medflow_core::order::{Actor, HistoryEntry, Order, OrderCommand, OrderSnapshot, OrderStatus};
use medflow_core::roles::JobRole;
use medflow_core::types::{DbId, JobId};
use medflow_realtime::api::{ApiError, ClinicalApi, JobRequest, JobStatusResponse, SubmitResponse};
use medflow_realtime::channel::FrameHandler;
use medflow_realtime::messages::PushFrame;
use tokio::sync::{broadcast, mpsc};

// ---------------------------------------------------------------------------
// FakeApi
// ---------------------------------------------------------------------------

/// Scripted clinical API. Order transitions are run through the real order
/// state machine as the current `acting_as` actor, like the server would.
#[derive(Default)]
pub struct FakeApi {
    submit_results: Mutex<VecDeque<Result<SubmitResponse, (u16, String)>>>,
    job_statuses: Mutex<HashMap<JobId, JobStatusResponse>>,
    orders: Mutex<HashMap<DbId, OrderSnapshot>>,
    acting_as: Mutex<Option<Actor>>,
    pub submit_calls: AtomicUsize,
    pub transition_calls: AtomicUsize,
    pub get_order_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_submit(&self, response: SubmitResponse) {
        self.submit_results.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_submit_error(&self, status: u16, message: &str) {
        self.submit_results
            .lock()
            .unwrap()
            .push_back(Err((status, message.to_string())));
    }

    pub fn set_job_status(&self, job_id: &str, status: &str, result: Option<serde_json::Value>) {
        self.job_statuses.lock().unwrap().insert(
            JobId::from(job_id),
            JobStatusResponse {
                job_id: JobId::from(job_id),
                status: status.to_string(),
                result,
                error: None,
            },
        );
    }

    pub fn put_order(&self, snapshot: OrderSnapshot) {
        self.orders.lock().unwrap().insert(snapshot.order_id, snapshot);
    }

    pub fn order(&self, order_id: DbId) -> Option<OrderSnapshot> {
        self.orders.lock().unwrap().get(&order_id).cloned()
    }

    pub fn act_as(&self, actor: Actor) {
        *self.acting_as.lock().unwrap() = Some(actor);
    }

    fn api_error(status: u16, code: &str, message: String) -> ApiError {
        ApiError::Api {
            status,
            code: Some(code.to_string()),
            message,
        }
    }
}

#[async_trait::async_trait]
impl ClinicalApi for FakeApi {
    async fn submit(&self, _request: &JobRequest) -> Result<SubmitResponse, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        match self.submit_results.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err((status, message))) => Err(Self::api_error(status, "VALIDATION_ERROR", message)),
            None => Err(Self::api_error(500, "INTERNAL_ERROR", "no scripted response".into())),
        }
    }

    async fn job_status(&self, job_id: &JobId) -> Result<JobStatusResponse, ApiError> {
        self.job_statuses
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Self::api_error(404, "NOT_FOUND", format!("job {job_id} not found")))
    }

    async fn get_order(&self, order_id: DbId) -> Result<OrderSnapshot, ApiError> {
        self.get_order_calls.fetch_add(1, Ordering::SeqCst);
        self.order(order_id)
            .ok_or_else(|| Self::api_error(404, "NOT_FOUND", format!("order {order_id} not found")))
    }

    async fn transition_order(
        &self,
        order_id: DbId,
        command: &OrderCommand,
    ) -> Result<OrderSnapshot, ApiError> {
        self.transition_calls.fetch_add(1, Ordering::SeqCst);
        let actor = self
            .acting_as
            .lock()
            .unwrap()
            .ok_or_else(|| Self::api_error(401, "UNAUTHORIZED", "no actor".into()))?;
        let snapshot = self
            .order(order_id)
            .ok_or_else(|| Self::api_error(404, "NOT_FOUND", format!("order {order_id} not found")))?;

        let mut order = Order::hydrate(snapshot).map_err(|e| Self::api_error(500, "INTERNAL_ERROR", e.to_string()))?;
        order.apply(&actor, command.clone(), Utc::now()).map_err(|e| {
            let status = match e {
                CoreError::Forbidden(_) => 403,
                CoreError::Conflict(_) => 409,
                CoreError::Validation(_) => 400,
            };
            Self::api_error(status, e.code(), e.to_string())
        })?;

        let updated = order.snapshot().clone();
        self.put_order(updated.clone());
        Ok(updated)
    }

    async fn order_history(&self, order_id: DbId) -> Result<Vec<HistoryEntry>, ApiError> {
        self.order(order_id)
            .map(|o| o.history)
            .ok_or_else(|| Self::api_error(404, "NOT_FOUND", format!("order {order_id} not found")))
    }
}

/// A fresh lab order from requester 1.
pub fn ordered_snapshot(order_id: DbId) -> OrderSnapshot {
    OrderSnapshot {
        order_id,
        requester: 1,
        target_role: JobRole::Lis,
        status: OrderStatus::Ordered,
        assignee: None,
        result: None,
        outcome: None,
        cancel_reason: None,
        history: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Frame recording
// ---------------------------------------------------------------------------

pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<PushFrame>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PushFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait::async_trait]
impl FrameHandler for RecordingHandler {
    async fn handle_frame(&self, frame: PushFrame) {
        let _ = self.tx.send(frame);
    }
}

// ---------------------------------------------------------------------------
// TestPushServer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ServerCommand {
    Text(String),
    Close,
}

#[derive(Clone)]
struct ServerState {
    reply_pong: bool,
    outbound: broadcast::Sender<ServerCommand>,
    inbound: mpsc::UnboundedSender<String>,
    tokens: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

/// In-process push endpoint on `127.0.0.1:0`.
pub struct TestPushServer {
    pub url: String,
    state: ServerState,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl TestPushServer {
    /// Start a server. With `reply_pong` it answers every `ping` frame.
    pub async fn start(reply_pong: bool) -> Self {
        let (outbound, _) = broadcast::channel(64);
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let state = ServerState {
            reply_pong,
            outbound,
            inbound: inbound_tx,
            tokens: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("ws://{addr}/ws"),
            state,
            inbound,
        }
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Wait until `n` connections have been accepted in total.
    pub async fn wait_for_connections(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connection_count() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server never saw the expected connections");
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.state
            .outbound
            .send(ServerCommand::Text(value.to_string()))
            .expect("no live connection");
    }

    pub fn close_all(&self) {
        let _ = self.state.outbound.send(ServerCommand::Close);
    }

    /// Next text frame the client sent.
    pub async fn next_inbound(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("server stopped")
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    state
        .tokens
        .lock()
        .unwrap()
        .push(params.get("token").cloned().unwrap_or_default());
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: ServerState) {
    let mut commands = state.outbound.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(ServerCommand::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCommand::Close) | Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let text = text.to_string();
                    if state.reply_pong && text.contains("\"ping\"") {
                        let _ = socket.send(Message::Text(r#"{"type":"pong"}"#.into())).await;
                    }
                    let _ = state.inbound.send(text);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Receive with a timeout so a missing message fails instead of hanging.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, within: Duration) -> Option<T> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}
