//! Order service against the scripted API.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use common::{ordered_snapshot, FakeApi};
use medflow_core::error::CoreError;
use medflow_core::order::{Actor, HistoryEntry, OrderCommand, OrderStatus, TransitionOutcome};
use medflow_core::roles::JobRole;
use medflow_events::{EventBus, StatusEvent};
use medflow_realtime::api::{ApiError, ClinicalApi};
use medflow_realtime::orders::{OrderService, OrderServiceError};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const ORDER: i64 = 100;

fn worker(id: i64) -> Actor {
    Actor::new(id, JobRole::Lis)
}

fn requester() -> Actor {
    Actor::new(1, JobRole::Doctor)
}

async fn loaded() -> (Arc<FakeApi>, OrderService) {
    let api = FakeApi::new();
    api.put_order(ordered_snapshot(ORDER));
    let service = OrderService::new(api.clone());
    service.load(ORDER).await.unwrap();
    (api, service)
}

#[tokio::test]
async fn second_worker_cannot_start_claimed_order() {
    let (api, service) = loaded().await;

    api.act_as(worker(10));
    let outcome = service
        .transition(&worker(10), ORDER, OrderCommand::Accept)
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Applied);

    let order = service.get(ORDER).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Accepted);
    assert_eq!(order.history().len(), 1);

    api.act_as(worker(11));
    let err = service
        .transition(&worker(11), ORDER, OrderCommand::Start)
        .await
        .unwrap_err();
    assert_matches!(err, OrderServiceError::Rejected(CoreError::Forbidden(_)));

    // Refused locally: the server was never asked.
    assert_eq!(api.transition_calls.load(Ordering::SeqCst), 1);
    let order = service.get(ORDER).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Accepted);
    assert_eq!(order.history().len(), 1);
}

#[tokio::test]
async fn full_lifecycle_through_server() {
    let (api, service) = loaded().await;

    api.act_as(worker(10));
    service.transition(&worker(10), ORDER, OrderCommand::Accept).await.unwrap();
    service.transition(&worker(10), ORDER, OrderCommand::Start).await.unwrap();
    service
        .transition(
            &worker(10),
            ORDER,
            OrderCommand::SubmitResult {
                result: json!({"findings": [{"code": "K", "value": 4.1}]}),
            },
        )
        .await
        .unwrap();

    api.act_as(requester());
    service
        .transition(&requester(), ORDER, OrderCommand::Confirm { accepted: true })
        .await
        .unwrap();

    let order = service.get(ORDER).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(order.outcome(), Some(true));

    let history = service.history(ORDER).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|w| w[0].at <= w[1].at));
}

#[tokio::test]
async fn identical_retry_does_not_call_server() {
    let (api, service) = loaded().await;
    api.act_as(worker(10));

    service.transition(&worker(10), ORDER, OrderCommand::Accept).await.unwrap();
    let outcome = service
        .transition(&worker(10), ORDER, OrderCommand::Accept)
        .await
        .unwrap();

    assert_eq!(outcome, TransitionOutcome::AlreadyApplied);
    assert_eq!(api.transition_calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.get(ORDER).await.unwrap().history().len(), 1);
}

#[tokio::test]
async fn missing_findings_rejected_locally() {
    let (api, service) = loaded().await;
    api.act_as(worker(10));
    service.transition(&worker(10), ORDER, OrderCommand::Accept).await.unwrap();
    service.transition(&worker(10), ORDER, OrderCommand::Start).await.unwrap();

    let err = service
        .transition(
            &worker(10),
            ORDER,
            OrderCommand::SubmitResult { result: json!({"notes": "looks fine"}) },
        )
        .await
        .unwrap_err();
    assert_matches!(err, OrderServiceError::Rejected(CoreError::Validation(_)));
    assert_eq!(service.get(ORDER).await.unwrap().status(), OrderStatus::InProgress);
}

#[tokio::test]
async fn server_rejection_keeps_local_order() {
    let (api, service) = loaded().await;

    // Someone else claimed it on the server; our copy is stale.
    let mut stale = api.order(ORDER).unwrap();
    stale.status = OrderStatus::Accepted;
    stale.assignee = Some(11);
    stale.history.push(medflow_core::order::HistoryEntry {
        at: chrono::Utc::now(),
        actor: 11,
        from: OrderStatus::Ordered,
        to: OrderStatus::Accepted,
        reason: None,
    });
    api.put_order(stale);

    api.act_as(worker(10));
    let err = service
        .transition(&worker(10), ORDER, OrderCommand::Accept)
        .await
        .unwrap_err();
    assert_matches!(err, OrderServiceError::Api(ApiError::Api { status: 409, .. }));

    let local = service.get(ORDER).await.unwrap();
    assert_eq!(local.status(), OrderStatus::Ordered);
    assert!(local.history().is_empty());

    service.rehydrate().await;
    assert_eq!(service.get(ORDER).await.unwrap().assignee(), Some(11));
}

#[tokio::test]
async fn unknown_order_is_not_loaded() {
    let api = FakeApi::new();
    let service = OrderService::new(api);
    let err = service
        .transition(&worker(10), 5, OrderCommand::Accept)
        .await
        .unwrap_err();
    assert_matches!(err, OrderServiceError::NotLoaded(5));
}

#[tokio::test]
async fn status_event_refreshes_tracked_order() {
    let api = FakeApi::new();
    api.put_order(ordered_snapshot(ORDER));
    let service = Arc::new(OrderService::new(api.clone()));
    service.load(ORDER).await.unwrap();

    let bus = EventBus::default();
    let cancel = CancellationToken::new();
    let listener = service.spawn_listener(&bus, cancel.clone());

    // The order changes on the server behind our back.
    api.act_as(worker(10));
    api.transition_order(ORDER, &OrderCommand::Accept).await.unwrap();

    bus.publish(
        StatusEvent::new("OCS_STATUS_CHANGED")
            .with_order(ORDER)
            .with_status("ACCEPTED"),
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if service.get(ORDER).await.map(|o| o.status()) == Some(OrderStatus::Accepted) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("order was never refreshed");

    cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn events_for_untracked_orders_are_ignored() {
    let (api, service) = loaded().await;
    let before = api.get_order_calls.load(Ordering::SeqCst);

    let refreshed = service
        .handle_event(&StatusEvent::new("OCS_STATUS_CHANGED").with_order(999))
        .await;
    assert!(!refreshed);
    let refreshed = service
        .handle_event(&StatusEvent::new("connection").with_status("connected"))
        .await;
    assert!(!refreshed);
    assert_eq!(api.get_order_calls.load(Ordering::SeqCst), before);
}

fn entry(minute: u32, from: OrderStatus, to: OrderStatus) -> HistoryEntry {
    HistoryEntry {
        at: Utc.with_ymd_and_hms(2026, 3, 1, 8, minute, 0).unwrap(),
        actor: 10,
        from,
        to,
        reason: None,
    }
}

#[tokio::test]
async fn history_is_returned_in_order() {
    let api = FakeApi::new();
    let mut snapshot = ordered_snapshot(ORDER);
    snapshot.status = OrderStatus::InProgress;
    snapshot.assignee = Some(10);
    snapshot.history = vec![
        entry(0, OrderStatus::Ordered, OrderStatus::Accepted),
        entry(5, OrderStatus::Accepted, OrderStatus::InProgress),
    ];
    api.put_order(snapshot);
    let service = OrderService::new(api.clone());

    let history = service.history(ORDER).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].to, OrderStatus::InProgress);
}

#[tokio::test]
async fn out_of_order_history_is_rejected() {
    let api = FakeApi::new();
    let mut snapshot = ordered_snapshot(ORDER);
    snapshot.status = OrderStatus::InProgress;
    snapshot.assignee = Some(10);
    snapshot.history = vec![
        entry(5, OrderStatus::Ordered, OrderStatus::Accepted),
        entry(0, OrderStatus::Accepted, OrderStatus::InProgress),
    ];
    api.put_order(snapshot);
    let service = OrderService::new(api.clone());

    let err = service.history(ORDER).await.unwrap_err();
    assert_matches!(
        err,
        OrderServiceError::Rejected(CoreError::Validation(ref message))
            if message.contains("out of chronological order")
    );
}
