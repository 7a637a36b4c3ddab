//! Authenticated session: owns the push channel and everything wired to it.
//!
//! Created at login with [`Session::start`] and torn down at logout with
//! [`Session::shutdown`]. Components are handed out as `Arc` handles.

use std::sync::Arc;
use std::time::Duration;

use medflow_events::{EventBus, StatusEvent, EVENT_CONNECTION};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::ClinicalApi;
use crate::channel::{ConnectionState, HeartbeatConfig, TransportChannel};
use crate::client::{ChannelError, PushClient};
use crate::correlator::JobCorrelator;
use crate::dispatcher::NotificationDispatcher;
use crate::gateway::SubmissionGateway;
use crate::orders::OrderService;
use crate::reconnect::{reconnect, ReconnectConfig, ReconnectOutcome};

/// How long shutdown waits for each background task.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    /// Client-side job timeout. `None` waits indefinitely.
    pub job_timeout: Option<Duration>,
}

pub struct Session {
    id: Uuid,
    credential: Option<String>,
    config: SessionConfig,
    channel: Arc<TransportChannel>,
    correlator: Arc<JobCorrelator>,
    bus: Arc<EventBus>,
    gateway: Arc<SubmissionGateway>,
    orders: Arc<OrderService>,
    /// Master token, cancelled at shutdown.
    cancel: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Wire up the session and open the push channel.
    ///
    /// A failed first connect leaves the session disconnected for the caller
    /// to [`reconnect`](Self::reconnect); only an unusable push URL is an
    /// error. Without a credential the session also starts disconnected.
    pub async fn start(
        api: Arc<dyn ClinicalApi>,
        push: PushClient,
        credential: Option<String>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, ChannelError> {
        let id = Uuid::new_v4();
        let channel = Arc::new(TransportChannel::new(push, config.heartbeat));
        let correlator = Arc::new(JobCorrelator::new());
        let bus = Arc::new(EventBus::default());
        let gateway = Arc::new(SubmissionGateway::new(
            Arc::clone(&api),
            Arc::clone(&correlator),
            config.job_timeout,
        ));
        let orders = Arc::new(OrderService::new(api));

        channel
            .on_frame(Arc::new(NotificationDispatcher::new(
                Arc::clone(&correlator),
                Arc::clone(&bus),
            )))
            .await;

        let cancel = CancellationToken::new();
        let tasks = vec![
            spawn_state_forwarder(channel.subscribe_state(), Arc::clone(&bus), cancel.child_token()),
            orders.spawn_listener(&bus, cancel.child_token()),
        ];

        let session = Arc::new(Self {
            id,
            credential,
            config,
            channel,
            correlator,
            bus,
            gateway,
            orders,
            cancel,
            tasks: Mutex::new(tasks),
        });

        tracing::info!(session_id = %id, "Starting session");
        match session.channel.connect(session.credential.as_deref()).await {
            Ok(()) => {}
            Err(e @ ChannelError::InvalidUrl(_)) => {
                session.shutdown().await;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Initial connect failed, waiting for reconnect");
            }
        }
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &Arc<TransportChannel> {
        &self.channel
    }

    pub fn correlator(&self) -> &Arc<JobCorrelator> {
        &self.correlator
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn gateway(&self) -> &Arc<SubmissionGateway> {
        &self.gateway
    }

    pub fn orders(&self) -> &Arc<OrderService> {
        &self.orders
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.subscribe_state()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has begun.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Reconnect with backoff, then recover anything missed while down.
    ///
    /// Pending jobs are polled and tracked orders refetched. Cancelled by
    /// [`shutdown`](Self::shutdown).
    pub async fn reconnect(&self) -> ReconnectOutcome {
        let outcome = reconnect(
            &self.channel,
            self.credential.as_deref(),
            &self.config.reconnect,
            &self.cancel,
        )
        .await;

        if outcome == ReconnectOutcome::Connected {
            let resolved = self.gateway.poll_pending().await;
            let refreshed = self.orders.rehydrate().await;
            tracing::info!(session_id = %self.id, resolved, refreshed, "Session resynchronised");
        }
        outcome
    }

    /// Logout: abandon pending jobs, close the channel, stop background
    /// tasks. Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!(session_id = %self.id, "Shutting down session");
        self.cancel.cancel();

        let abandoned = self.correlator.clear().await;
        if abandoned > 0 {
            tracing::info!(abandoned, "Abandoned pending jobs");
        }

        self.channel.disconnect().await;

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in tasks {
            let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await;
        }

        tracing::info!(session_id = %self.id, "Session shut down");
    }
}

/// Republish connection state changes on the side channel.
fn spawn_state_forwarder(
    mut state_rx: watch::Receiver<ConnectionState>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    tracing::debug!(%state, "Connection state changed");
                    bus.publish(StatusEvent::new(EVENT_CONNECTION).with_status(state.as_str()));
                }
            }
        }
    })
}
