//! Closed vocabulary of platform event types.
//!
//! Every subscribable event the automation platform emits is listed here.
//! Subscription writes are validated against this set; `test.webhook` is
//! reserved for manual test deliveries and cannot be subscribed to.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Event name used for manual test deliveries.
///
/// Not part of the subscribable vocabulary; sent through the same signing
/// and delivery path but never persisted as a retryable attempt.
pub const TEST_EVENT: &str = "test.webhook";

/// Platform event types that subscriptions can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// An automation was created.
    #[serde(rename = "automation.created")]
    AutomationCreated,

    /// An automation run finished successfully.
    #[serde(rename = "automation.completed")]
    AutomationCompleted,

    /// An automation run failed.
    #[serde(rename = "automation.failed")]
    AutomationFailed,

    /// A new email was synced into the platform.
    #[serde(rename = "email.received")]
    EmailReceived,

    /// An outbound email was sent.
    #[serde(rename = "email.sent")]
    EmailSent,

    /// A task was created.
    #[serde(rename = "task.created")]
    TaskCreated,

    /// A task was completed.
    #[serde(rename = "task.completed")]
    TaskCompleted,

    /// A task was updated.
    #[serde(rename = "task.updated")]
    TaskUpdated,

    /// A third-party integration was connected.
    #[serde(rename = "integration.connected")]
    IntegrationConnected,

    /// A third-party integration was disconnected.
    #[serde(rename = "integration.disconnected")]
    IntegrationDisconnected,
}

impl EventType {
    /// All subscribable event types, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::AutomationCreated,
        Self::AutomationCompleted,
        Self::AutomationFailed,
        Self::EmailReceived,
        Self::EmailSent,
        Self::TaskCreated,
        Self::TaskCompleted,
        Self::TaskUpdated,
        Self::IntegrationConnected,
        Self::IntegrationDisconnected,
    ];

    /// Returns the wire name of this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutomationCreated => "automation.created",
            Self::AutomationCompleted => "automation.completed",
            Self::AutomationFailed => "automation.failed",
            Self::EmailReceived => "email.received",
            Self::EmailSent => "email.sent",
            Self::TaskCreated => "task.created",
            Self::TaskCompleted => "task.completed",
            Self::TaskUpdated => "task.updated",
            Self::IntegrationConnected => "integration.connected",
            Self::IntegrationDisconnected => "integration.disconnected",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automation.created" => Ok(Self::AutomationCreated),
            "automation.completed" => Ok(Self::AutomationCompleted),
            "automation.failed" => Ok(Self::AutomationFailed),
            "email.received" => Ok(Self::EmailReceived),
            "email.sent" => Ok(Self::EmailSent),
            "task.created" => Ok(Self::TaskCreated),
            "task.completed" => Ok(Self::TaskCompleted),
            "task.updated" => Ok(Self::TaskUpdated),
            "integration.connected" => Ok(Self::IntegrationConnected),
            "integration.disconnected" => Ok(Self::IntegrationDisconnected),
            _ => Err(CoreError::InvalidInput(format!("unknown event type: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for EventType {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(|_| format!("invalid event type: {s}").into())
    }
}

impl sqlx::Encode<'_, PgDb> for EventType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_type_round_trips_through_its_name() {
        for event in EventType::ALL {
            let parsed: EventType = event.as_str().parse().expect("name should parse");
            assert_eq!(parsed, event);
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!("automation.exploded".parse::<EventType>().is_err());
        assert!("".parse::<EventType>().is_err());
        assert!(TEST_EVENT.parse::<EventType>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EventType::TaskCompleted).unwrap();
        assert_eq!(json, "\"task.completed\"");

        let parsed: EventType = serde_json::from_str("\"email.received\"").unwrap();
        assert_eq!(parsed, EventType::EmailReceived);
    }
}
