//! Storage abstraction layer for the dispatch engine.
//!
//! The dispatcher and sweeper depend on this trait rather than on concrete
//! repositories, so delivery logic, retry scheduling, and error handling
//! are testable without a database. Production uses the PostgreSQL adapter;
//! tests use the deterministic in-memory mock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::{
    error::Result,
    models::{AttemptId, DeliveryAttempt, OrgId, Subscription, SubscriptionId},
    storage::Storage,
    EventType,
};

/// Storage operations required by the dispatch engine.
#[async_trait]
pub trait DispatchStorage: Send + Sync + 'static {
    /// Returns active subscriptions of the org whose event set contains the
    /// given type.
    ///
    /// Store unavailability must surface as an error — the dispatcher fails
    /// closed and propagates it to the `dispatch` caller.
    async fn find_matching_subscriptions(
        &self,
        org_id: OrgId,
        event_type: EventType,
    ) -> Result<Vec<Subscription>>;

    /// Finds a subscription by ID.
    async fn find_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>>;

    /// Creates a pending delivery attempt row.
    async fn create_attempt(&self, attempt: &DeliveryAttempt) -> Result<AttemptId>;

    /// Marks an attempt as successfully delivered. Terminal.
    async fn mark_attempt_succeeded(
        &self,
        id: AttemptId,
        response_code: i32,
        response_body: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Marks an attempt as failed, scheduling a retry when `next_retry_at`
    /// is set and going terminal when it is `None`.
    async fn mark_attempt_failed(
        &self,
        id: AttemptId,
        response_code: Option<i32>,
        response_body: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
        failed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Atomically claims due retryable attempts for resending.
    ///
    /// Claimed rows leave the retryable selection window before any HTTP
    /// request is made, so concurrent sweepers never send the same row.
    async fn claim_due_attempts(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>>;

    /// Records the time of the most recent successful delivery for a
    /// subscription. Last-writer-wins.
    async fn touch_last_triggered(&self, id: SubscriptionId, at: DateTime<Utc>) -> Result<()>;
}

/// Production storage implementation backed by PostgreSQL.
///
/// Thin adapter over the repository layer; all SQL lives in
/// `pulse_core::storage`.
pub struct PostgresDispatchStorage {
    storage: Arc<Storage>,
}

impl PostgresDispatchStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl DispatchStorage for PostgresDispatchStorage {
    async fn find_matching_subscriptions(
        &self,
        org_id: OrgId,
        event_type: EventType,
    ) -> Result<Vec<Subscription>> {
        self.storage.subscriptions.find_matching(org_id, event_type).await
    }

    async fn find_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        self.storage.subscriptions.find_by_id(id).await
    }

    async fn create_attempt(&self, attempt: &DeliveryAttempt) -> Result<AttemptId> {
        self.storage.delivery_attempts.create(attempt).await
    }

    async fn mark_attempt_succeeded(
        &self,
        id: AttemptId,
        response_code: i32,
        response_body: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.storage
            .delivery_attempts
            .mark_succeeded(id, response_code, response_body.as_deref(), completed_at)
            .await
    }

    async fn mark_attempt_failed(
        &self,
        id: AttemptId,
        response_code: Option<i32>,
        response_body: Option<String>,
        next_retry_at: Option<DateTime<Utc>>,
        failed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.storage
            .delivery_attempts
            .mark_failed(id, response_code, response_body.as_deref(), next_retry_at, failed_at)
            .await
    }

    async fn claim_due_attempts(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>> {
        self.storage.delivery_attempts.claim_due(limit, now).await
    }

    async fn touch_last_triggered(&self, id: SubscriptionId, at: DateTime<Utc>) -> Result<()> {
        self.storage.subscriptions.touch_last_triggered(id, at).await
    }
}

pub mod mock {
    //! Mock storage implementation for testing.
    //!
    //! Deterministic, in-memory storage for exercising dispatch logic
    //! without a database. The claim operation runs under a single write
    //! lock, preserving the at-most-one-claim-per-row invariant the
    //! production `FOR UPDATE SKIP LOCKED` query provides.

    use std::collections::HashMap;

    use pulse_core::{
        error::CoreError,
        models::AttemptStatus,
        storage::delivery_attempts::MAX_ATTEMPT_INDEX,
    };
    use tokio::sync::RwLock;

    use super::{
        async_trait, AttemptId, DateTime, DeliveryAttempt, DispatchStorage, EventType, OrgId,
        Result, Subscription, SubscriptionId, Utc,
    };

    /// In-memory mock of `DispatchStorage`.
    pub struct MockDispatchStorage {
        subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
        attempts: RwLock<HashMap<AttemptId, DeliveryAttempt>>,
        lookup_error: RwLock<Option<String>>,
    }

    impl MockDispatchStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self {
                subscriptions: RwLock::new(HashMap::new()),
                attempts: RwLock::new(HashMap::new()),
                lookup_error: RwLock::new(None),
            }
        }

        /// Registers a subscription.
        pub async fn add_subscription(&self, subscription: Subscription) {
            self.subscriptions.write().await.insert(subscription.id, subscription);
        }

        /// Injects an error for the next subscription lookup.
        pub async fn inject_lookup_error(&self, error: impl Into<String>) {
            *self.lookup_error.write().await = Some(error.into());
        }

        /// Returns a stored attempt by ID.
        pub async fn attempt(&self, id: AttemptId) -> Option<DeliveryAttempt> {
            self.attempts.read().await.get(&id).cloned()
        }

        /// Returns all attempts for a subscription, oldest first.
        pub async fn attempts_for(&self, subscription_id: SubscriptionId) -> Vec<DeliveryAttempt> {
            let mut attempts: Vec<_> = self
                .attempts
                .read()
                .await
                .values()
                .filter(|a| a.subscription_id == subscription_id)
                .cloned()
                .collect();
            attempts.sort_by_key(|a| a.created_at);
            attempts
        }

        /// Total number of stored attempt rows.
        pub async fn attempt_count(&self) -> usize {
            self.attempts.read().await.len()
        }

        /// Returns a stored subscription by ID.
        pub async fn subscription(&self, id: SubscriptionId) -> Option<Subscription> {
            self.subscriptions.read().await.get(&id).cloned()
        }
    }

    impl Default for MockDispatchStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl DispatchStorage for MockDispatchStorage {
        async fn find_matching_subscriptions(
            &self,
            org_id: OrgId,
            event_type: EventType,
        ) -> Result<Vec<Subscription>> {
            if let Some(error) = self.lookup_error.write().await.take() {
                return Err(CoreError::Database(error));
            }

            Ok(self
                .subscriptions
                .read()
                .await
                .values()
                .filter(|s| s.org_id == org_id && s.active && s.matches(event_type))
                .cloned()
                .collect())
        }

        async fn find_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
            Ok(self.subscriptions.read().await.get(&id).cloned())
        }

        async fn create_attempt(&self, attempt: &DeliveryAttempt) -> Result<AttemptId> {
            self.attempts.write().await.insert(attempt.id, attempt.clone());
            Ok(attempt.id)
        }

        async fn mark_attempt_succeeded(
            &self,
            id: AttemptId,
            response_code: i32,
            response_body: Option<String>,
            completed_at: DateTime<Utc>,
        ) -> Result<()> {
            if let Some(attempt) = self.attempts.write().await.get_mut(&id) {
                attempt.status = AttemptStatus::Success;
                attempt.response_code = Some(response_code);
                attempt.response_body = response_body;
                attempt.next_retry_at = None;
                attempt.completed_at = Some(completed_at);
            }
            Ok(())
        }

        async fn mark_attempt_failed(
            &self,
            id: AttemptId,
            response_code: Option<i32>,
            response_body: Option<String>,
            next_retry_at: Option<DateTime<Utc>>,
            failed_at: DateTime<Utc>,
        ) -> Result<()> {
            if let Some(attempt) = self.attempts.write().await.get_mut(&id) {
                attempt.status = AttemptStatus::Failed;
                attempt.response_code = response_code;
                attempt.response_body = response_body;
                attempt.next_retry_at = next_retry_at;
                attempt.completed_at = if next_retry_at.is_none() { Some(failed_at) } else { None };
            }
            Ok(())
        }

        async fn claim_due_attempts(
            &self,
            limit: usize,
            now: DateTime<Utc>,
        ) -> Result<Vec<DeliveryAttempt>> {
            // Single write lock for the whole claim keeps it atomic, like
            // the production SKIP LOCKED transaction.
            let mut attempts = self.attempts.write().await;

            let mut due: Vec<AttemptId> = attempts
                .values()
                .filter(|a| {
                    matches!(a.status, AttemptStatus::Pending | AttemptStatus::Failed)
                        && a.next_retry_at.is_some_and(|at| at <= now)
                        && a.attempt_count < MAX_ATTEMPT_INDEX
                })
                .map(|a| a.id)
                .collect();
            due.truncate(limit);

            let mut claimed = Vec::with_capacity(due.len());
            for id in due {
                if let Some(attempt) = attempts.get_mut(&id) {
                    attempt.status = AttemptStatus::Pending;
                    attempt.next_retry_at = None;
                    attempt.attempt_count += 1;
                    claimed.push(attempt.clone());
                }
            }

            Ok(claimed)
        }

        async fn touch_last_triggered(
            &self,
            id: SubscriptionId,
            at: DateTime<Utc>,
        ) -> Result<()> {
            if let Some(subscription) = self.subscriptions.write().await.get_mut(&id) {
                subscription.last_triggered_at = Some(at);
            }
            Ok(())
        }
    }
}
