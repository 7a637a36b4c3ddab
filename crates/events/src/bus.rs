//! In-process side channel backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`StatusEvent`]s: unsolicited push frames that are
//! not tied to a pending job (order status changes, worklist assignment)
//! and connection state changes. Shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use medflow_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// Event type used for connection state changes.
pub const EVENT_CONNECTION: &str = "connection";

/// An unsolicited status change observed by the client.
///
/// Built with [`StatusEvent::new`] and the `with_*` builder methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Frame type as sent by the server, e.g. `"OCS_STATUS_CHANGED"`.
    pub event_type: String,

    /// Order the event refers to, if any.
    pub order_id: Option<DbId>,

    /// Status named by the event, if any.
    pub status: Option<String>,

    /// Full frame body.
    pub payload: serde_json::Value,

    /// When the client received the event (UTC).
    pub received_at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            order_id: None,
            status: None,
            payload: serde_json::Value::Object(Default::default()),
            received_at: Utc::now(),
        }
    }

    pub fn with_order(mut self, order_id: DbId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for [`StatusEvent`]s.
///
/// ```rust
/// use medflow_events::bus::{EventBus, StatusEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(StatusEvent::new("WORKLIST_ASSIGNED"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers observe `RecvError::Lagged` once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: StatusEvent) {
        tracing::trace!(event_type = %event.event_type, "Publishing status event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
