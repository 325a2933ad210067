//! Dispatch orchestration: match, sign, send, record, schedule.
//!
//! `dispatch` fans one event out to every matching subscription with one
//! concurrent send per match. The internal `send` primitive is shared by
//! dispatch, the retry sweeper, and manual test deliveries, so every
//! callback leaves through the same signing and classification path.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use pulse_core::{
    events::TEST_EVENT,
    models::{DeliveryAttempt, OrgId, Subscription, SubscriptionId},
    Clock, EventType,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    client::{ClientConfig, DeliveryClient, WebhookRequest, WebhookResponse},
    error::{DispatchError, Result},
    retry::{self, RetryDecision},
    signer,
    storage::DispatchStorage,
};

/// Outcome counts for one `dispatch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Subscriptions matched by the event.
    pub matched: usize,
    /// Sends that got a 2xx.
    pub delivered: usize,
    /// Sends that failed and were scheduled for retry or went terminal.
    pub failed: usize,
}

/// Result of a single send of one attempt row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Subscriber answered 2xx; the attempt is terminally succeeded.
    Delivered {
        /// HTTP status code of the response.
        status_code: u16,
    },
    /// Send failed; a retry is scheduled.
    RetryScheduled {
        /// When the sweeper will pick the row up again.
        next_attempt_at: DateTime<Utc>,
    },
    /// Send failed and the retry budget is exhausted. Terminal.
    Exhausted,
}

/// Synchronous result of a manual test delivery.
///
/// Returned directly to the operator; nothing is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TestDeliveryOutcome {
    /// Whether the subscriber answered 2xx within the timeout.
    pub success: bool,
    /// HTTP status code, when a response was received at all.
    pub status_code: Option<u16>,
    /// Truncated response body, when a response was received.
    pub response_excerpt: Option<String>,
    /// Error description for timeouts and connection failures.
    pub error: Option<String>,
}

/// Orchestrates webhook dispatch for platform events.
///
/// Cheap to clone; all state is behind `Arc` or in the pooled HTTP client.
#[derive(Clone)]
pub struct Dispatcher {
    storage: Arc<dyn DispatchStorage>,
    client: DeliveryClient,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Creates a new dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(
        storage: Arc<dyn DispatchStorage>,
        client_config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self { storage, client: DeliveryClient::new(client_config)?, clock })
    }

    /// Delivers an event to every matching subscription of the org.
    ///
    /// Matches active subscriptions, snapshots the outbound body once,
    /// creates one pending attempt row per match, then sends to all
    /// matches concurrently (one task per subscription) and waits for the
    /// sends to settle. Zero matches is a successful no-op.
    ///
    /// Event sources that must not block on subscriber I/O submit through
    /// [`crate::queue::DispatchQueue`] instead of awaiting this directly.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::SubscriptionLookup` when the subscription
    /// store cannot be queried — the dispatch fails closed and no
    /// deliveries are attempted — and `DispatchError::Database` when an
    /// attempt row cannot be created.
    pub async fn dispatch(
        &self,
        org_id: OrgId,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<DispatchSummary> {
        let subscriptions = self
            .storage
            .find_matching_subscriptions(org_id, event_type)
            .await
            .map_err(|e| DispatchError::subscription_lookup(e.to_string()))?;

        if subscriptions.is_empty() {
            debug!(org_id = %org_id, event_type = %event_type, "no matching subscriptions");
            return Ok(DispatchSummary::default());
        }

        let now = self.clock.now();
        // One snapshot for the whole fan-out; every retry signs these bytes.
        let payload = json!({
            "event": event_type.as_str(),
            "timestamp": now.to_rfc3339(),
            "data": data,
        });

        let mut pairs = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let attempt = DeliveryAttempt::new(subscription.id, event_type, payload.clone(), now);
            self.storage
                .create_attempt(&attempt)
                .await
                .map_err(|e| DispatchError::database(e.to_string()))?;
            pairs.push((attempt, subscription));
        }

        let mut summary = DispatchSummary { matched: pairs.len(), ..Default::default() };

        let handles: Vec<_> = pairs
            .into_iter()
            .map(|(attempt, subscription)| {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.send(&attempt, &subscription).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            match result {
                Ok(Ok(SendOutcome::Delivered { .. })) => summary.delivered += 1,
                Ok(Ok(_)) => summary.failed += 1,
                Ok(Err(error)) => {
                    error!(error = %error, "send failed inside dispatch pipeline");
                    summary.failed += 1;
                },
                Err(join_error) => {
                    error!(error = %join_error, "send task panicked");
                    summary.failed += 1;
                },
            }
        }

        info!(
            org_id = %org_id,
            event_type = %event_type,
            matched = summary.matched,
            delivered = summary.delivered,
            failed = summary.failed,
            "dispatch completed"
        );

        Ok(summary)
    }

    /// Sends one attempt to its subscription and records the outcome.
    ///
    /// Shared primitive behind dispatch and the retry sweeper. Signs the
    /// stored payload snapshot, issues the POST, then classifies: 2xx is
    /// terminal success (and touches the subscription's
    /// `last_triggered_at`); anything else — non-2xx, connect failure,
    /// timeout — is a failure that either schedules the next retry or goes
    /// terminal when the budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures inside the pipeline itself
    /// (signing, attempt-store updates); delivery failures are a recorded
    /// outcome, not an error.
    pub(crate) async fn send(
        &self,
        attempt: &DeliveryAttempt,
        subscription: &Subscription,
    ) -> Result<SendOutcome> {
        let body = snapshot_bytes(&attempt.payload.0)?;

        let result = self
            .deliver_signed(subscription, attempt.id.0, attempt.event_type.as_str(), body)
            .await;
        let now = self.clock.now();

        match result {
            Ok(response) if response.is_success => {
                self.storage
                    .mark_attempt_succeeded(
                        attempt.id,
                        i32::from(response.status_code),
                        Some(response.body),
                        now,
                    )
                    .await
                    .map_err(|e| DispatchError::database(e.to_string()))?;

                // Last-writer-wins; a lost update here is acceptable.
                if let Err(error) = self.storage.touch_last_triggered(subscription.id, now).await {
                    warn!(
                        subscription_id = %subscription.id,
                        error = %error,
                        "failed to update last_triggered_at"
                    );
                }

                info!(
                    attempt_id = %attempt.id,
                    subscription_id = %subscription.id,
                    status_code = response.status_code,
                    attempt_index = attempt.attempt_count,
                    "webhook delivered"
                );

                Ok(SendOutcome::Delivered { status_code: response.status_code })
            },
            Ok(response) => {
                self.record_failure(
                    attempt,
                    Some(i32::from(response.status_code)),
                    response.body,
                    now,
                )
                .await
            },
            Err(error) if error.is_delivery_failure() => {
                self.record_failure(attempt, None, error.to_string(), now).await
            },
            Err(error) => Err(error),
        }
    }

    /// Records a failed send, scheduling a retry or going terminal.
    pub(crate) async fn record_failure(
        &self,
        attempt: &DeliveryAttempt,
        response_code: Option<i32>,
        excerpt: String,
        failed_at: DateTime<Utc>,
    ) -> Result<SendOutcome> {
        match retry::decide(attempt.attempt_count, failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                self.storage
                    .mark_attempt_failed(
                        attempt.id,
                        response_code,
                        Some(excerpt.clone()),
                        Some(next_attempt_at),
                        failed_at,
                    )
                    .await
                    .map_err(|e| DispatchError::database(e.to_string()))?;

                warn!(
                    attempt_id = %attempt.id,
                    subscription_id = %attempt.subscription_id,
                    attempt_index = attempt.attempt_count,
                    response_code = response_code,
                    next_retry_at = %next_attempt_at,
                    "delivery failed, retry scheduled"
                );

                Ok(SendOutcome::RetryScheduled { next_attempt_at })
            },
            RetryDecision::GiveUp => {
                self.storage
                    .mark_attempt_failed(
                        attempt.id,
                        response_code,
                        Some(excerpt.clone()),
                        None,
                        failed_at,
                    )
                    .await
                    .map_err(|e| DispatchError::database(e.to_string()))?;

                // Dead-letter visibility: terminal failures are loud in the
                // logs and queryable through the attempts audit listing.
                warn!(
                    attempt_id = %attempt.id,
                    subscription_id = %attempt.subscription_id,
                    event_type = %attempt.event_type,
                    attempt_index = attempt.attempt_count,
                    response_code = response_code,
                    error = %excerpt,
                    "delivery permanently failed, retry budget exhausted"
                );

                Ok(SendOutcome::Exhausted)
            },
        }
    }

    /// Sends a synthetic `test.webhook` event and returns the immediate
    /// outcome synchronously.
    ///
    /// Goes through the same signing and send path as real deliveries but
    /// persists no attempt row, so a failed test never enters the retry
    /// cycle.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::SubscriptionNotFound` if the subscription
    /// does not exist and `DispatchError::Database` if the lookup fails.
    /// Delivery failures are reported inside the outcome, not as errors.
    pub async fn test_delivery(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<TestDeliveryOutcome> {
        let subscription = self
            .storage
            .find_subscription(subscription_id)
            .await
            .map_err(|e| DispatchError::database(e.to_string()))?
            .ok_or_else(|| DispatchError::SubscriptionNotFound {
                id: subscription_id.to_string(),
            })?;

        let now = self.clock.now();
        let payload = json!({
            "event": TEST_EVENT,
            "timestamp": now.to_rfc3339(),
            "data": { "subscription_id": subscription_id.to_string() },
        });
        let body = snapshot_bytes(&payload)?;

        match self.deliver_signed(&subscription, Uuid::new_v4(), TEST_EVENT, body).await {
            Ok(response) => Ok(TestDeliveryOutcome {
                success: response.is_success,
                status_code: Some(response.status_code),
                response_excerpt: Some(response.body),
                error: None,
            }),
            Err(error) if error.is_delivery_failure() => Ok(TestDeliveryOutcome {
                success: false,
                status_code: None,
                response_excerpt: None,
                error: Some(error.to_string()),
            }),
            Err(error) => Err(error),
        }
    }

    /// Signs the body with the subscription secret and issues the POST.
    async fn deliver_signed(
        &self,
        subscription: &Subscription,
        delivery_id: Uuid,
        event: &str,
        body: Bytes,
    ) -> Result<WebhookResponse> {
        let signature = signer::sign(&body, &subscription.secret)
            .map_err(|e| DispatchError::signing(e.to_string()))?;

        self.client
            .deliver(WebhookRequest {
                delivery_id,
                url: subscription.url.clone(),
                event: event.to_string(),
                body,
                signature,
            })
            .await
    }
}

/// Serializes a payload snapshot to the exact bytes that get signed.
fn snapshot_bytes(payload: &serde_json::Value) -> Result<Bytes> {
    serde_json::to_vec(payload)
        .map(Bytes::from)
        .map_err(|e| DispatchError::signing(format!("payload serialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_bytes_are_stable_across_calls() {
        let payload = json!({"event": "task.completed", "data": {"id": 7}});

        let first = snapshot_bytes(&payload).unwrap();
        let second = snapshot_bytes(&payload).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_outcome_serializes_optional_fields() {
        let outcome = TestDeliveryOutcome {
            success: false,
            status_code: None,
            response_excerpt: None,
            error: Some("request timeout after 10s".to_string()),
        };

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], false);
        assert!(value["status_code"].is_null());
        assert_eq!(value["error"], "request timeout after 10s");
    }
}
