//! Repository for delivery attempt database operations.
//!
//! The attempt row doubles as the retry queue entry: due rows are selected
//! by a time-indexed query and claimed atomically before any send, so no
//! separate queue structure exists. Claiming transitions the row out of the
//! retryable selection window (`next_retry_at` cleared, attempt index
//! bumped) under `FOR UPDATE SKIP LOCKED`, which guarantees at most one
//! in-flight send per row even with concurrent sweepers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{AttemptId, AttemptStatus, DeliveryAttempt, SubscriptionId},
};

const ATTEMPT_COLUMNS: &str = "id, subscription_id, event_type, payload, status, attempt_count, \
                               response_code, response_body, next_retry_at, created_at, \
                               completed_at";

/// Maximum attempt index; a send at a higher index never happens.
///
/// Index 0 is the initial dispatch send, indexes 1..=3 are the retries the
/// backoff table schedules.
pub const MAX_ATTEMPT_INDEX: i32 = 3;

/// Repository for delivery attempt database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates a new delivery attempt row in `pending` state.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, attempt: &DeliveryAttempt) -> Result<AttemptId> {
        let id: Uuid = sqlx::query_scalar(
            r"
            INSERT INTO delivery_attempts (
                id, subscription_id, event_type, payload, status, attempt_count,
                response_code, response_body, next_retry_at, created_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            ",
        )
        .bind(attempt.id.0)
        .bind(attempt.subscription_id.0)
        .bind(attempt.event_type)
        .bind(&attempt.payload)
        .bind(attempt.status)
        .bind(attempt.attempt_count)
        .bind(attempt.response_code)
        .bind(&attempt.response_body)
        .bind(attempt.next_retry_at)
        .bind(attempt.created_at)
        .bind(attempt.completed_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(AttemptId(id))
    }

    /// Claims due retryable attempts for resending.
    ///
    /// Selects up to `limit` rows whose retry is due using
    /// `FOR UPDATE SKIP LOCKED`, then atomically moves them back to
    /// `pending` with `next_retry_at` cleared and the attempt index bumped.
    /// A concurrent sweeper can never claim the same row: it is either
    /// row-locked or already outside the selection window.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT id FROM delivery_attempts
            WHERE status IN ('pending', 'failed')
              AND next_retry_at IS NOT NULL
              AND next_retry_at <= $1
              AND attempt_count < $2
            ORDER BY next_retry_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(now)
        .bind(MAX_ATTEMPT_INDEX)
        .bind(i64::try_from(limit).unwrap_or(100))
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let attempts = sqlx::query_as::<_, DeliveryAttempt>(&format!(
            r"
            UPDATE delivery_attempts
            SET status = 'pending', next_retry_at = NULL, attempt_count = attempt_count + 1
            WHERE id = ANY($1)
            RETURNING {ATTEMPT_COLUMNS}
            "
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(attempts)
    }

    /// Marks an attempt as successfully delivered. Terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_succeeded(
        &self,
        id: AttemptId,
        response_code: i32,
        response_body: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE delivery_attempts
            SET status = 'success',
                response_code = $2,
                response_body = $3,
                next_retry_at = NULL,
                completed_at = $4
            WHERE id = $1
            ",
        )
        .bind(id.0)
        .bind(response_code)
        .bind(response_body)
        .bind(completed_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks an attempt as failed.
    ///
    /// With `next_retry_at` set the row re-enters the sweeper's selection
    /// window; with `None` the failure is terminal and `completed_at` is
    /// stamped.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        id: AttemptId,
        response_code: Option<i32>,
        response_body: Option<&str>,
        next_retry_at: Option<DateTime<Utc>>,
        failed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE delivery_attempts
            SET status = 'failed',
                response_code = $2,
                response_body = $3,
                next_retry_at = $4,
                completed_at = CASE WHEN $4::TIMESTAMPTZ IS NULL THEN $5 ELSE NULL END
            WHERE id = $1
            ",
        )
        .bind(id.0)
        .bind(response_code)
        .bind(response_body)
        .bind(next_retry_at)
        .bind(failed_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds an attempt by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: AttemptId) -> Result<Option<DeliveryAttempt>> {
        let attempt = sqlx::query_as::<_, DeliveryAttempt>(&format!(
            r"
            SELECT {ATTEMPT_COLUMNS}
            FROM delivery_attempts
            WHERE id = $1
            "
        ))
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(attempt)
    }

    /// Lists attempts for a subscription, newest first, optionally filtered
    /// by status.
    ///
    /// This is the audit log operators read; terminal failures surface
    /// here as the dead-letter view.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        status: Option<AttemptStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<DeliveryAttempt>> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(&format!(
            r"
            SELECT {ATTEMPT_COLUMNS}
            FROM delivery_attempts
            WHERE subscription_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "
        ))
        .bind(subscription_id.0)
        .bind(status.map(|s| s.to_string()))
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(attempts)
    }

    /// Counts attempts by status.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: AttemptStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM delivery_attempts
            WHERE status = $1
            ",
        )
        .bind(status.to_string())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }
}
