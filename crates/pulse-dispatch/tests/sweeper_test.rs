//! Integration tests for the retry sweeper.
//!
//! Drives full retry lifecycles with a virtual clock: the fixed backoff
//! schedule, terminal exhaustion, and the claim-before-send guarantee
//! under concurrent sweeps.

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use pulse_core::{
    models::{AttemptStatus, DeliveryAttempt, OrgId, Subscription},
    Clock, EventType, TestClock,
};
use pulse_dispatch::{
    client::ClientConfig,
    storage::{mock::MockDispatchStorage, DispatchStorage},
    Dispatcher, RetrySweeper, SweeperConfig,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

struct Harness {
    storage: Arc<MockDispatchStorage>,
    clock: Arc<TestClock>,
    dispatcher: Dispatcher,
    sweeper: RetrySweeper,
}

fn harness(client_config: ClientConfig) -> Harness {
    let storage = Arc::new(MockDispatchStorage::new());
    let clock = Arc::new(TestClock::starting_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
    let dispatcher = Dispatcher::new(
        storage.clone() as Arc<dyn DispatchStorage>,
        client_config,
        clock.clone() as Arc<dyn Clock>,
    )
    .expect("dispatcher construction");
    let sweeper = RetrySweeper::new(
        storage.clone() as Arc<dyn DispatchStorage>,
        dispatcher.clone(),
        clock.clone() as Arc<dyn Clock>,
        SweeperConfig::default(),
        CancellationToken::new(),
    );

    Harness { storage, clock, dispatcher, sweeper }
}

fn subscription(org_id: OrgId, url: &str, clock: &TestClock) -> Subscription {
    Subscription::new(
        org_id,
        url.to_string(),
        "whsec_sweeper".to_string(),
        vec![EventType::TaskCompleted],
        clock.now(),
    )
}

#[tokio::test]
async fn retry_until_success_follows_the_backoff_schedule() {
    let server = MockServer::start().await;

    // First two sends hit 500, the third lands on the 200 fallback.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let h = harness(ClientConfig::default());
    let org = OrgId::new();
    let sub = subscription(org, &format!("{}/hooks", server.uri()), &h.clock);
    h.storage.add_subscription(sub.clone()).await;

    let t0 = h.clock.now();

    // Send at index 0 fails; first retry due after 1 minute.
    h.dispatcher.dispatch(org, EventType::TaskCompleted, json!({"task": 1})).await.expect("dispatch");

    let attempt = &h.storage.attempts_for(sub.id).await[0];
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.next_retry_at, Some(t0 + chrono::Duration::seconds(60)));

    // Not yet due: a sweep before the schedule claims nothing.
    assert_eq!(h.sweeper.sweep().await.expect("sweep"), 0);

    // t0+60: send at index 1 fails; second retry due 5 minutes later.
    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.sweeper.sweep().await.expect("sweep"), 1);

    let attempt = &h.storage.attempts_for(sub.id).await[0];
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.attempt_count, 1);
    assert_eq!(attempt.next_retry_at, Some(t0 + chrono::Duration::seconds(60 + 300)));

    // t0+360: send at index 2 succeeds.
    h.clock.advance(Duration::from_secs(300));
    assert_eq!(h.sweeper.sweep().await.expect("sweep"), 1);

    let attempt = &h.storage.attempts_for(sub.id).await[0];
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert_eq!(attempt.attempt_count, 2);
    assert_eq!(attempt.response_code, Some(200));
    assert!(attempt.next_retry_at.is_none());
    assert!(attempt.completed_at.is_some());

    // Exactly three sends left the building.
    let requests = server.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 3);

    // Every retry signed and sent the identical snapshot bytes.
    assert!(requests.windows(2).all(|pair| pair[0].body == pair[1].body));
}

#[tokio::test]
async fn always_failing_endpoint_exhausts_the_budget_and_goes_terminal() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("still broken"))
        .mount(&server)
        .await;

    let h = harness(ClientConfig::default());
    let org = OrgId::new();
    let sub = subscription(org, &format!("{}/hooks", server.uri()), &h.clock);
    h.storage.add_subscription(sub.clone()).await;

    h.dispatcher.dispatch(org, EventType::TaskCompleted, json!({})).await.expect("dispatch");

    // Walk the whole schedule: retries at +60s, +300s, +1800s.
    for delay in [60_u64, 300, 1800] {
        h.clock.advance(Duration::from_secs(delay));
        assert_eq!(h.sweeper.sweep().await.expect("sweep"), 1);
    }

    let attempt = h.storage.attempts_for(sub.id).await[0].clone();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert_eq!(attempt.attempt_count, 3);
    assert!(attempt.next_retry_at.is_none());
    assert!(attempt.completed_at.is_some());
    assert!(attempt.is_terminal());

    // A further sweep cycle never touches the terminal row.
    h.clock.advance(Duration::from_secs(3600));
    assert_eq!(h.sweeper.sweep().await.expect("sweep"), 0);
    let untouched = h.storage.attempts_for(sub.id).await[0].clone();
    assert_eq!(untouched.attempt_count, attempt.attempt_count);
    assert_eq!(untouched.completed_at, attempt.completed_at);

    let requests = server.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 4);
}

#[tokio::test]
async fn timeouts_are_failures_eligible_for_retry() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = ClientConfig { timeout: Duration::from_millis(200), ..Default::default() };
    let h = harness(config);
    let org = OrgId::new();
    let sub = subscription(org, &format!("{}/hooks", server.uri()), &h.clock);
    h.storage.add_subscription(sub.clone()).await;

    h.dispatcher.dispatch(org, EventType::TaskCompleted, json!({})).await.expect("dispatch");

    let attempt = &h.storage.attempts_for(sub.id).await[0];
    assert_eq!(attempt.status, AttemptStatus::Failed);
    // No response was received; the synthetic timeout error is recorded.
    assert!(attempt.response_code.is_none());
    assert!(attempt.response_body.as_deref().unwrap_or_default().contains("timeout"));
    assert!(attempt.next_retry_at.is_some());
}

#[tokio::test]
async fn concurrent_sweeps_never_send_one_row_twice() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(ClientConfig::default());
    let org = OrgId::new();
    let sub = subscription(org, &format!("{}/hooks", server.uri()), &h.clock);
    h.storage.add_subscription(sub.clone()).await;

    // One failed attempt, due immediately.
    let mut attempt = DeliveryAttempt::new(
        sub.id,
        EventType::TaskCompleted,
        json!({"event": "task.completed", "data": {}}),
        h.clock.now(),
    );
    attempt.status = AttemptStatus::Failed;
    attempt.next_retry_at = Some(h.clock.now());
    h.storage.create_attempt(&attempt).await.expect("seed attempt");

    let sweeper = Arc::new(h.sweeper);
    let sweeps: Vec<_> = (0..4)
        .map(|_| {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.sweep().await.expect("sweep") })
        })
        .collect();

    let mut total_claimed = 0;
    for handle in sweeps {
        total_claimed += handle.await.expect("sweep task");
    }

    // Exactly one sweeper won the claim; the endpoint saw a single send.
    assert_eq!(total_claimed, 1);
    server.verify().await;

    let attempt = &h.storage.attempts_for(sub.id).await[0];
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert_eq!(attempt.attempt_count, 1);
}

#[tokio::test]
async fn sweep_abandons_attempts_whose_subscription_is_gone() {
    let h = harness(ClientConfig::default());

    // Attempt row pointing at a subscription that no longer exists.
    let mut attempt = DeliveryAttempt::new(
        pulse_core::SubscriptionId::new(),
        EventType::TaskCompleted,
        json!({}),
        h.clock.now(),
    );
    attempt.status = AttemptStatus::Failed;
    attempt.next_retry_at = Some(h.clock.now());
    h.storage.create_attempt(&attempt).await.expect("seed attempt");

    assert_eq!(h.sweeper.sweep().await.expect("sweep"), 1);

    let row = h.storage.attempt(attempt.id).await.expect("row exists");
    assert_eq!(row.status, AttemptStatus::Failed);
    assert!(row.next_retry_at.is_none());
    assert!(row.is_terminal());
}

#[tokio::test]
async fn sweep_claims_at_most_the_configured_batch() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let storage = Arc::new(MockDispatchStorage::new());
    let clock = Arc::new(TestClock::starting_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
    let dispatcher = Dispatcher::new(
        storage.clone() as Arc<dyn DispatchStorage>,
        ClientConfig::default(),
        clock.clone() as Arc<dyn Clock>,
    )
    .expect("dispatcher construction");
    let sweeper = RetrySweeper::new(
        storage.clone() as Arc<dyn DispatchStorage>,
        dispatcher,
        clock.clone() as Arc<dyn Clock>,
        SweeperConfig { batch_size: 2, ..Default::default() },
        CancellationToken::new(),
    );

    let org = OrgId::new();
    let sub = subscription(org, &format!("{}/hooks", server.uri()), &clock);
    storage.add_subscription(sub.clone()).await;

    for _ in 0..5 {
        let mut attempt =
            DeliveryAttempt::new(sub.id, EventType::TaskCompleted, json!({}), clock.now());
        attempt.status = AttemptStatus::Failed;
        attempt.next_retry_at = Some(clock.now());
        storage.create_attempt(&attempt).await.expect("seed attempt");
    }

    assert_eq!(sweeper.sweep().await.expect("sweep"), 2);
    assert_eq!(sweeper.sweep().await.expect("sweep"), 2);
    assert_eq!(sweeper.sweep().await.expect("sweep"), 1);
    assert_eq!(sweeper.sweep().await.expect("sweep"), 0);
}
