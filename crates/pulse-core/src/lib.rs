//! Core domain models and storage for the Pulse webhook service.
//!
//! Provides strongly-typed domain primitives, the closed event-type
//! vocabulary, error handling, and the repository layer for subscription
//! and delivery-attempt persistence. All other crates depend on these
//! foundational types for type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::EventType;
pub use models::{AttemptId, AttemptStatus, DeliveryAttempt, OrgId, Subscription, SubscriptionId};
pub use time::{Clock, RealClock, TestClock};
