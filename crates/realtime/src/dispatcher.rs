//! Routes inbound push frames.
//!
//! - Frames with a `job_id` and a terminal status go to the
//!   [`JobCorrelator`].
//! - Frames with a `job_id` and a non-terminal status are progress hints;
//!   they are logged and dropped (no partial-update merging).
//! - Everything else is an unsolicited status event and goes to the
//!   [`EventBus`] side channel.

use std::sync::Arc;

use medflow_events::{EventBus, StatusEvent};

use crate::channel::FrameHandler;
use crate::correlator::JobCorrelator;
use crate::messages::PushFrame;

pub struct NotificationDispatcher {
    correlator: Arc<JobCorrelator>,
    bus: Arc<EventBus>,
}

impl NotificationDispatcher {
    pub fn new(correlator: Arc<JobCorrelator>, bus: Arc<EventBus>) -> Self {
        Self { correlator, bus }
    }

    pub async fn dispatch(&self, frame: PushFrame) {
        if let Some(job_id) = frame.job_id.clone() {
            match frame.job_update() {
                Some(update) => {
                    self.correlator.resolve(&job_id, update).await;
                }
                None => {
                    tracing::debug!(
                        job_id = %job_id,
                        frame_type = %frame.frame_type,
                        status = ?frame.status,
                        "Non-terminal job frame, ignoring",
                    );
                }
            }
            return;
        }

        self.bus.publish(to_status_event(frame));
    }
}

#[async_trait::async_trait]
impl FrameHandler for NotificationDispatcher {
    async fn handle_frame(&self, frame: PushFrame) {
        self.dispatch(frame).await;
    }
}

fn to_status_event(frame: PushFrame) -> StatusEvent {
    let mut event = StatusEvent::new(frame.frame_type.clone());
    if let Some(order_id) = frame.order_id {
        event = event.with_order(order_id);
    }
    if let Some(status) = frame.status.clone() {
        event = event.with_status(status);
    }
    match serde_json::to_value(&frame) {
        Ok(payload) => event.with_payload(payload),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize status frame payload");
            event
        }
    }
}

#[cfg(test)]
mod tests {
    use medflow_core::job::JobUpdate;
    use medflow_core::types::JobId;
    use serde_json::json;

    use super::*;
    use crate::messages::parse_frame;

    fn setup() -> (NotificationDispatcher, Arc<JobCorrelator>, Arc<EventBus>) {
        let correlator = Arc::new(JobCorrelator::new());
        let bus = Arc::new(EventBus::default());
        (
            NotificationDispatcher::new(Arc::clone(&correlator), Arc::clone(&bus)),
            correlator,
            bus,
        )
    }

    #[tokio::test]
    async fn terminal_job_frame_resolves_correlator() {
        let (dispatcher, correlator, _bus) = setup();
        let rx = correlator.subscribe(JobId::from("j1")).await;

        dispatcher
            .dispatch(
                parse_frame(r#"{"type":"AI_INFERENCE_RESULT","job_id":"j1","status":"COMPLETED","result":{"p":0.7}}"#)
                    .unwrap(),
            )
            .await;

        assert_eq!(rx.await.unwrap(), JobUpdate::completed(json!({"p": 0.7})));
    }

    #[tokio::test]
    async fn progress_frame_leaves_job_pending() {
        let (dispatcher, correlator, bus) = setup();
        let mut events = bus.subscribe();
        let _rx = correlator.subscribe(JobId::from("j1")).await;

        dispatcher
            .dispatch(
                parse_frame(r#"{"type":"AI_INFERENCE_RESULT","job_id":"j1","status":"PROCESSING"}"#).unwrap(),
            )
            .await;

        assert!(correlator.is_pending(&JobId::from("j1")).await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsolicited_frame_goes_to_side_channel() {
        let (dispatcher, correlator, bus) = setup();
        let mut events = bus.subscribe();

        dispatcher
            .dispatch(
                parse_frame(r#"{"type":"OCS_STATUS_CHANGED","order_id":5,"status":"ACCEPTED"}"#).unwrap(),
            )
            .await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, "OCS_STATUS_CHANGED");
        assert_eq!(event.order_id, Some(5));
        assert_eq!(event.status.as_deref(), Some("ACCEPTED"));
        assert_eq!(event.payload["order_id"], 5);
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn frame_for_other_session_is_dropped() {
        let (dispatcher, correlator, bus) = setup();
        let mut events = bus.subscribe();

        dispatcher
            .dispatch(
                parse_frame(r#"{"type":"AI_INFERENCE_RESULT","job_id":"other","status":"FAILED"}"#).unwrap(),
            )
            .await;

        assert_eq!(correlator.pending_count().await, 0);
        assert!(events.try_recv().is_err());
    }
}
