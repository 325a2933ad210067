//! Repository for subscription database operations.
//!
//! Provides type-safe access to subscription records, including the
//! matching query the dispatcher uses to fan events out and the
//! opportunistic `last_triggered_at` touch on successful delivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    events::EventType,
    models::{OrgId, Subscription, SubscriptionId},
};

const SUBSCRIPTION_COLUMNS: &str =
    "id, org_id, url, secret, event_types, active, last_triggered_at, created_at, updated_at";

/// Repository for subscription database operations.
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

    /// Creates a new subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or constraints are violated.
    pub async fn create(&self, subscription: &Subscription) -> Result<SubscriptionId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO subscriptions (
                id, org_id, url, secret, event_types, active,
                last_triggered_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            ",
        )
        .bind(subscription.id.0)
        .bind(subscription.org_id.0)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(&subscription.event_types)
        .bind(subscription.active)
        .bind(subscription.last_triggered_at)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(SubscriptionId(id))
    }

    /// Finds active subscriptions of an org whose event set contains the
    /// given type.
    ///
    /// This is the matcher query behind `dispatch`: the JSONB containment
    /// operator checks membership of the event name in the stored set.
    /// No ordering is guaranteed; matches are delivered independently.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails — the dispatcher surfaces this to
    /// its caller rather than silently dropping the event.
    pub async fn find_matching(
        &self,
        org_id: OrgId,
        event_type: EventType,
    ) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE org_id = $1
              AND active = TRUE
              AND event_types ? $2
            "
        ))
        .bind(org_id.0)
        .bind(event_type.as_str())
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Finds a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE id = $1
            "
        ))
        .bind(id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Finds a subscription by ID scoped to an org.
    ///
    /// Used by the management API so one org can never read another's
    /// subscriptions.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id_for_org(
        &self,
        org_id: OrgId,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE id = $1 AND org_id = $2
            "
        ))
        .bind(id.0)
        .bind(org_id.0)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Lists all subscriptions of an org, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_org(&self, org_id: OrgId, limit: Option<i64>) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE org_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "
        ))
        .bind(org_id.0)
        .bind(limit.unwrap_or(100))
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Updates the mutable fields of a subscription.
    ///
    /// The secret is immutable after creation and deliberately absent here.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update(
        &self,
        id: SubscriptionId,
        url: &str,
        event_types: &[EventType],
        active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE subscriptions
            SET url = $2, event_types = $3, active = $4, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(id.0)
        .bind(url)
        .bind(sqlx::types::Json(event_types))
        .bind(active)
        .bind(updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes a subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, org_id: OrgId, id: SubscriptionId) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM subscriptions
            WHERE id = $1 AND org_id = $2
            ",
        )
        .bind(id.0)
        .bind(org_id.0)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Records the time of the most recent successful delivery.
    ///
    /// Last-writer-wins; concurrent sends may race here and lost updates
    /// are acceptable.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn touch_last_triggered(
        &self,
        id: SubscriptionId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE subscriptions
            SET last_triggered_at = $2
            WHERE id = $1
            ",
        )
        .bind(id.0)
        .bind(at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Counts all subscriptions of an org.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_org(&self, org_id: OrgId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM subscriptions
            WHERE org_id = $1
            ",
        )
        .bind(org_id.0)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}
