//! Session supervision loop.
//!
//! Watches the push channel state and drives caller-side reconnects, and
//! logs side-channel events as they arrive. Runs until the session shuts
//! down or the future is dropped.

use std::sync::Arc;

use medflow_events::EVENT_CONNECTION;
use medflow_realtime::channel::ConnectionState;
use medflow_realtime::reconnect::ReconnectOutcome;
use medflow_realtime::session::Session;
use tokio::sync::broadcast;

pub async fn run(session: Arc<Session>) {
    let mut states = session.subscribe_state();
    let mut events = session.bus().subscribe();

    // The first connect may already have failed.
    let initial = *states.borrow_and_update();
    if initial == ConnectionState::Disconnected && !recover(&session).await {
        return;
    }

    loop {
        tokio::select! {
            _ = session.closed() => {
                tracing::info!("Session closed, supervisor stopping");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    tracing::info!("Push channel gone, supervisor stopping");
                    break;
                }
                let state = *states.borrow_and_update();
                if state == ConnectionState::Disconnected && !recover(&session).await {
                    break;
                }
            }
            received = events.recv() => match received {
                Ok(event) if event.event_type == EVENT_CONNECTION => {
                    tracing::info!(state = ?event.status, "Connection state");
                }
                Ok(event) => {
                    tracing::info!(
                        event_type = %event.event_type,
                        order_id = ?event.order_id,
                        status = ?event.status,
                        "Status event",
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Supervisor lagged behind status events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, supervisor stopping");
                    break;
                }
            },
        }
    }
}

/// Reconnect the session. Returns `false` once reconnecting was cancelled.
async fn recover(session: &Session) -> bool {
    match session.reconnect().await {
        ReconnectOutcome::Connected => true,
        ReconnectOutcome::Cancelled => false,
        ReconnectOutcome::NoCredential => {
            tracing::warn!("Disconnected without a credential, not reconnecting");
            true
        }
    }
}
