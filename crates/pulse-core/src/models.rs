//! Core domain models and strongly-typed identifiers.
//!
//! Defines subscriptions, delivery attempts, and newtype ID wrappers for
//! compile-time type safety. Includes database serialization traits and the
//! attempt state transitions used by the dispatch pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EventType;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed subscription identifier.
///
/// Wraps a UUID to prevent mixing with other ID types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed organization identifier.
///
/// Provides multi-tenancy isolation. Every subscription and delivery
/// attempt is scoped to an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub Uuid);

impl OrgId {
    /// Creates a new random organization ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OrgId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for OrgId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for OrgId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for OrgId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed delivery attempt identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    /// Creates a new random attempt ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AttemptId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for AttemptId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AttemptId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for AttemptId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Delivery attempt lifecycle status.
///
/// Attempts progress through these states:
///
/// ```text
/// pending -> success                          (2xx on any send)
/// pending -> failed (retryable)               (non-2xx/timeout, retries left)
/// failed (retryable) -> pending               (sweeper claims for resend)
/// failed (retryable) -> failed (terminal)     (retry budget exhausted)
/// ```
///
/// Retryable and terminal failures share the `failed` status; a terminal
/// failure is distinguished by `next_retry_at` being null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Created by dispatch, or claimed by the sweeper; a send is imminent
    /// or in flight.
    Pending,

    /// Delivered: the subscriber answered with a 2xx. Terminal.
    Success,

    /// The last send did not succeed. Retryable while `next_retry_at` is
    /// set; terminal once it is null.
    Failed,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for AttemptStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for AttemptStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid attempt status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for AttemptStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// A tenant's registration of a destination URL plus the event types it
/// wants delivered.
///
/// The secret is generated once at creation and never changes; callback
/// signatures are keyed by it for the subscription's whole lifetime.
/// Mutation happens only through the management API — the dispatch core
/// reads subscriptions but never writes them, except for the opportunistic
/// `last_triggered_at` touch on successful delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    /// Unique identifier for this subscription.
    pub id: SubscriptionId,

    /// Organization that owns this subscription.
    pub org_id: OrgId,

    /// Destination URL for webhook delivery. Must be http or https.
    pub url: String,

    /// Shared secret for HMAC payload signing.
    ///
    /// Returned to the caller exactly once, in the create response.
    pub secret: String,

    /// Event types this subscription wants delivered. Never empty.
    pub event_types: sqlx::types::Json<Vec<EventType>>,

    /// Whether this subscription should receive deliveries.
    ///
    /// Inactive subscriptions are skipped at dispatch time. Soft-disable
    /// without losing configuration.
    pub active: bool,

    /// When a delivery to this subscription last succeeded.
    ///
    /// Updated opportunistically; tolerates lost writes.
    pub last_triggered_at: Option<DateTime<Utc>>,

    /// When this subscription was created.
    pub created_at: DateTime<Utc>,

    /// When this subscription was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Builds a new active subscription with freshly stamped timestamps.
    pub fn new(
        org_id: OrgId,
        url: String,
        secret: String,
        event_types: Vec<EventType>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            org_id,
            url,
            secret,
            event_types: sqlx::types::Json(event_types),
            active: true,
            last_triggered_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Whether this subscription's event set contains the given type.
    pub fn matches(&self, event_type: EventType) -> bool {
        self.event_types.0.contains(&event_type)
    }
}

/// The record of one concrete try (or scheduled retry) to deliver one event
/// to one subscription.
///
/// The payload snapshot is the full outbound body captured at dispatch time;
/// retries serialize and sign this snapshot, never a re-derived body, so the
/// signature always matches what was sent.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryAttempt {
    /// Unique identifier for this attempt row.
    pub id: AttemptId,

    /// Subscription this delivery targets.
    pub subscription_id: SubscriptionId,

    /// Event type being delivered.
    pub event_type: EventType,

    /// Outbound body snapshot, captured when dispatch began.
    pub payload: sqlx::types::Json<serde_json::Value>,

    /// Current lifecycle status.
    pub status: AttemptStatus,

    /// Zero-based index of the most recent send.
    ///
    /// 0 for the initial dispatch send; the sweeper's claim increments it
    /// for each retry. A failure at index 3 is terminal.
    pub attempt_count: i32,

    /// HTTP status code of the last response, if one was received.
    pub response_code: Option<i32>,

    /// Truncated response body or error message from the last send.
    pub response_body: Option<String>,

    /// When the next retry is due. Null means no further retry: either the
    /// attempt succeeded, is currently in flight, or failed terminally.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When dispatch created this row.
    pub created_at: DateTime<Utc>,

    /// When the attempt reached a terminal state (success or exhausted).
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeliveryAttempt {
    /// Builds a fresh pending attempt for one subscription.
    pub fn new(
        subscription_id: SubscriptionId,
        event_type: EventType,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            subscription_id,
            event_type,
            payload: sqlx::types::Json(payload),
            status: AttemptStatus::Pending,
            attempt_count: 0,
            response_code: None,
            response_body: None,
            next_retry_at: None,
            created_at,
            completed_at: None,
        }
    }

    /// Whether this attempt will never be sent again.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            AttemptStatus::Success => true,
            AttemptStatus::Failed => self.next_retry_at.is_none(),
            AttemptStatus::Pending => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_status_display_format() {
        assert_eq!(AttemptStatus::Pending.to_string(), "pending");
        assert_eq!(AttemptStatus::Success.to_string(), "success");
        assert_eq!(AttemptStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn subscription_matches_its_event_set() {
        let sub = Subscription::new(
            OrgId::new(),
            "https://example.com/hooks".to_string(),
            "whsec_test".to_string(),
            vec![EventType::TaskCompleted, EventType::EmailReceived],
            Utc::now(),
        );

        assert!(sub.matches(EventType::TaskCompleted));
        assert!(sub.matches(EventType::EmailReceived));
        assert!(!sub.matches(EventType::AutomationFailed));
    }

    #[test]
    fn new_attempt_starts_pending_at_count_zero() {
        let attempt = DeliveryAttempt::new(
            SubscriptionId::new(),
            EventType::TaskCreated,
            serde_json::json!({"event": "task.created"}),
            Utc::now(),
        );

        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert_eq!(attempt.attempt_count, 0);
        assert!(attempt.next_retry_at.is_none());
        assert!(attempt.completed_at.is_none());
        assert!(!attempt.is_terminal());
    }

    #[test]
    fn terminal_state_requires_null_next_retry() {
        let mut attempt = DeliveryAttempt::new(
            SubscriptionId::new(),
            EventType::TaskCreated,
            serde_json::json!({}),
            Utc::now(),
        );

        attempt.status = AttemptStatus::Failed;
        attempt.next_retry_at = Some(Utc::now());
        assert!(!attempt.is_terminal());

        attempt.next_retry_at = None;
        assert!(attempt.is_terminal());

        attempt.status = AttemptStatus::Success;
        assert!(attempt.is_terminal());
    }
}
