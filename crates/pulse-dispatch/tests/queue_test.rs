//! Integration tests for the background dispatch queue.

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use pulse_core::{
    models::{OrgId, Subscription},
    Clock, EventType, TestClock,
};
use pulse_dispatch::{
    client::ClientConfig,
    storage::{mock::MockDispatchStorage, DispatchStorage},
    DispatchError, DispatchQueue, Dispatcher, QueueConfig,
};
use serde_json::json;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn build_dispatcher(storage: &Arc<MockDispatchStorage>) -> (Dispatcher, Arc<TestClock>) {
    let clock = Arc::new(TestClock::starting_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
    let dispatcher = Dispatcher::new(
        storage.clone() as Arc<dyn DispatchStorage>,
        ClientConfig::default(),
        clock.clone() as Arc<dyn Clock>,
    )
    .expect("dispatcher construction");
    (dispatcher, clock)
}

async fn wait_for_attempts(storage: &MockDispatchStorage, expected: usize) {
    for _ in 0..100 {
        if storage.attempt_count().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {expected} attempts, found {}", storage.attempt_count().await);
}

#[tokio::test]
async fn submit_returns_immediately_and_the_worker_dispatches() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MockDispatchStorage::new());
    let (dispatcher, clock) = build_dispatcher(&storage);

    let org = OrgId::new();
    let sub = Subscription::new(
        org,
        format!("{}/hooks", server.uri()),
        "whsec_queue".to_string(),
        vec![EventType::AutomationCompleted],
        clock.now(),
    );
    storage.add_subscription(sub).await;

    let queue = DispatchQueue::start(dispatcher, QueueConfig::default());
    queue
        .submit(org, EventType::AutomationCompleted, json!({"run_id": "r-1"}))
        .expect("submit");

    wait_for_attempts(&storage, 1).await;
    server.verify().await;

    queue.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_accepted_events() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let storage = Arc::new(MockDispatchStorage::new());
    let (dispatcher, clock) = build_dispatcher(&storage);

    let org = OrgId::new();
    let sub = Subscription::new(
        org,
        format!("{}/hooks", server.uri()),
        "whsec_queue".to_string(),
        vec![EventType::TaskUpdated],
        clock.now(),
    );
    storage.add_subscription(sub).await;

    let queue = DispatchQueue::start(dispatcher, QueueConfig::default());
    for i in 0..5 {
        queue.submit(org, EventType::TaskUpdated, json!({"task": i})).expect("submit");
    }

    // Shutdown must not lose events that submit() already accepted.
    queue.shutdown().await;

    assert_eq!(storage.attempt_count().await, 5);
}

#[tokio::test]
async fn submit_fails_loudly_when_the_queue_is_full() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let storage = Arc::new(MockDispatchStorage::new());
    let (dispatcher, clock) = build_dispatcher(&storage);

    let org = OrgId::new();
    let sub = Subscription::new(
        org,
        format!("{}/hooks", server.uri()),
        "whsec_queue".to_string(),
        vec![EventType::EmailSent],
        clock.now(),
    );
    storage.add_subscription(sub).await;

    let queue = DispatchQueue::start(dispatcher, QueueConfig { capacity: 1 });

    // The slow endpoint keeps the worker busy, so the buffer fills and at
    // least one submission must be rejected rather than silently dropped.
    let mut rejected = 0;
    for i in 0..50 {
        match queue.submit(org, EventType::EmailSent, json!({"message": i})) {
            Ok(()) => {},
            Err(DispatchError::QueueFull) => rejected += 1,
            Err(other) => panic!("unexpected submit error: {other}"),
        }
    }
    assert!(rejected > 0);

    queue.shutdown().await;
}
