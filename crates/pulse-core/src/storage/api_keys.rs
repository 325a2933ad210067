//! Repository for API key database operations.
//!
//! API keys authenticate the management ingress and scope every request to
//! an organization. Keys are stored as SHA-256 hashes; the plaintext never
//! touches the database.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{error::Result, models::OrgId};

/// API key record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    /// Unique identifier for the API key.
    pub id: Uuid,
    /// Organization this key authenticates as.
    pub org_id: OrgId,
    /// SHA-256 hash of the key material.
    pub key_hash: String,
    /// Human-readable label.
    pub name: String,
    /// Optional expiration timestamp.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when the key is disabled.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Last successful authentication with this key.
    pub last_used_at: Option<DateTime<Utc>>,
    /// When the key was created.
    pub created_at: DateTime<Utc>,
}

/// Repository for API key database operations.
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

    /// Creates a new API key.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or the hash already exists.
    pub async fn create(&self, api_key: &ApiKey) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO api_keys (id, org_id, key_hash, name, expires_at, revoked_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(api_key.id)
        .bind(api_key.org_id.0)
        .bind(&api_key.key_hash)
        .bind(&api_key.name)
        .bind(api_key.expires_at)
        .bind(api_key.revoked_at)
        .bind(api_key.created_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Validates an API key hash and returns the owning org.
    ///
    /// Checks the key exists, is not revoked, and is not expired; on
    /// success bumps `last_used_at` (best effort).
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn validate(&self, key_hash: &str) -> Result<Option<OrgId>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r"
            SELECT org_id
            FROM api_keys
            WHERE key_hash = $1
              AND revoked_at IS NULL
              AND (expires_at IS NULL OR expires_at > NOW())
            ",
        )
        .bind(key_hash)
        .fetch_optional(&*self.pool)
        .await?;

        if let Some((org_id,)) = row {
            let _ = sqlx::query(
                r"
                UPDATE api_keys
                SET last_used_at = NOW()
                WHERE key_hash = $1
                ",
            )
            .bind(key_hash)
            .execute(&*self.pool)
            .await;

            Ok(Some(OrgId(org_id)))
        } else {
            Ok(None)
        }
    }

    /// Revokes an API key.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn revoke(&self, key_hash: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE api_keys
            SET revoked_at = NOW()
            WHERE key_hash = $1
            ",
        )
        .bind(key_hash)
        .execute(&*self.pool)
        .await?;

        Ok(())
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
