//! Order service: hydrated orders and server-side transitions.
//!
//! Orders only enter the client by hydrating a server snapshot. A
//! transition is first run against a copy of the local order so the
//! specific authorization or validation error is reported without a
//! round-trip; the server then performs it and its snapshot replaces the
//! local copy. The local order is never partially transitioned.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use medflow_core::error::CoreError;
use medflow_core::job_events::{FRAME_TYPE_ORDER_STATUS_CHANGED, FRAME_TYPE_WORKLIST_ASSIGNED};
use medflow_core::order::{Actor, HistoryEntry, Order, OrderCommand, TransitionOutcome};
use medflow_core::types::DbId;
use medflow_events::{EventBus, StatusEvent};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ClinicalApi};

#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    /// The transition or snapshot was refused by the order state machine.
    #[error(transparent)]
    Rejected(#[from] CoreError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Order {0} is not loaded")]
    NotLoaded(DbId),
}

pub struct OrderService {
    api: Arc<dyn ClinicalApi>,
    orders: RwLock<HashMap<DbId, Order>>,
}

impl OrderService {
    pub fn new(api: Arc<dyn ClinicalApi>) -> Self {
        Self {
            api,
            orders: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch and hydrate an order, tracking it from now on.
    pub async fn load(&self, order_id: DbId) -> Result<Order, OrderServiceError> {
        let snapshot = self.api.get_order(order_id).await?;
        let order = Order::hydrate(snapshot)?;
        self.orders.write().await.insert(order_id, order.clone());
        Ok(order)
    }

    pub async fn get(&self, order_id: DbId) -> Option<Order> {
        self.orders.read().await.get(&order_id).cloned()
    }

    pub async fn tracked_ids(&self) -> Vec<DbId> {
        self.orders.read().await.keys().copied().collect()
    }

    pub async fn forget(&self, order_id: DbId) -> bool {
        self.orders.write().await.remove(&order_id).is_some()
    }

    /// Run `command` on `order_id` as `actor`.
    ///
    /// Fails with the local reason (`Forbidden`, `Conflict`, `Validation`)
    /// before calling the server when the transition cannot succeed. An
    /// identical retry returns [`TransitionOutcome::AlreadyApplied`] without
    /// a request.
    pub async fn transition(
        &self,
        actor: &Actor,
        order_id: DbId,
        command: OrderCommand,
    ) -> Result<TransitionOutcome, OrderServiceError> {
        let current = self
            .get(order_id)
            .await
            .ok_or(OrderServiceError::NotLoaded(order_id))?;

        // Server clocks may run ahead of ours.
        let now = Utc::now();
        let at = current.history().last().map_or(now, |last| last.at.max(now));

        let mut candidate = current.clone();
        if candidate.apply(actor, command.clone(), at)? == TransitionOutcome::AlreadyApplied {
            tracing::debug!(order_id, action = command.endpoint(), "Transition already applied");
            return Ok(TransitionOutcome::AlreadyApplied);
        }

        let snapshot = self.api.transition_order(order_id, &command).await?;
        let updated = Order::hydrate(snapshot)?;
        if updated.status() != command.target() {
            tracing::warn!(
                order_id,
                expected = %command.target(),
                actual = %updated.status(),
                "Server snapshot disagrees with transition target",
            );
        }

        tracing::info!(
            order_id,
            actor = actor.id,
            from = %current.status(),
            to = %updated.status(),
            "Order transitioned",
        );
        self.orders.write().await.insert(order_id, updated);
        Ok(TransitionOutcome::Applied)
    }

    /// Fetch the audit trail of `order_id`.
    ///
    /// Rejects a history that is out of chronological order.
    pub async fn history(&self, order_id: DbId) -> Result<Vec<HistoryEntry>, OrderServiceError> {
        let history = self.api.order_history(order_id).await?;
        if let Some(index) = history.windows(2).position(|pair| pair[1].at < pair[0].at) {
            return Err(CoreError::Validation(format!(
                "Order {order_id} history entry {} is out of chronological order",
                index + 1
            ))
            .into());
        }
        Ok(history)
    }

    /// Refetch every tracked order. Returns how many refreshed.
    pub async fn rehydrate(&self) -> usize {
        let mut refreshed = 0;
        for order_id in self.tracked_ids().await {
            match self.load(order_id).await {
                Ok(_) => refreshed += 1,
                Err(e) => tracing::warn!(order_id, error = %e, "Failed to rehydrate order"),
            }
        }
        tracing::debug!(refreshed, "Rehydrated orders");
        refreshed
    }

    /// Refetch a tracked order named by an unsolicited status event.
    ///
    /// Returns `true` if an order was refreshed.
    pub async fn handle_event(&self, event: &StatusEvent) -> bool {
        let relevant = event.event_type == FRAME_TYPE_ORDER_STATUS_CHANGED
            || event.event_type == FRAME_TYPE_WORKLIST_ASSIGNED;
        let Some(order_id) = event.order_id.filter(|_| relevant) else {
            return false;
        };
        if !self.orders.read().await.contains_key(&order_id) {
            return false;
        }
        match self.load(order_id).await {
            Ok(order) => {
                tracing::debug!(order_id, status = %order.status(), "Refreshed order after status event");
                true
            }
            Err(e) => {
                tracing::warn!(order_id, error = %e, "Failed to refresh order after status event");
                false
            }
        }
    }

    /// Follow the side channel until `cancel` fires or the bus closes.
    pub fn spawn_listener(
        self: &Arc<Self>,
        bus: &EventBus,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            service.handle_event(&event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "Order listener lagged, rehydrating");
                            service.rehydrate().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Event bus closed, order listener shutting down");
                            break;
                        }
                    },
                }
            }
        })
    }
}
