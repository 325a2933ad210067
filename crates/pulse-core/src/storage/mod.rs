//! Database access layer implementing the repository pattern for webhook
//! persistence.
//!
//! The repository layer translates between domain models and database rows.
//! All database operations go through these repositories; SQL outside this
//! module is forbidden to keep the schema isolated from domain logic.

use std::sync::Arc;

use sqlx::PgPool;

pub mod api_keys;
pub mod delivery_attempts;
pub mod subscriptions;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for subscription records.
    pub subscriptions: Arc<subscriptions::Repository>,

    /// Repository for delivery attempt tracking.
    pub delivery_attempts: Arc<delivery_attempts::Repository>,

    /// Repository for API key validation.
    pub api_keys: Arc<api_keys::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    ///
    /// All repositories share the same pool via Arc.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            subscriptions: Arc::new(subscriptions::Repository::new(pool.clone())),
            delivery_attempts: Arc::new(delivery_attempts::Repository::new(pool.clone())),
            api_keys: Arc::new(api_keys::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// Executes a trivial query; used by the `/ready` endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) =
            sqlx::query_as("SELECT 1").fetch_one(&*self.subscriptions.pool()).await?;

        Ok(())
    }
}
