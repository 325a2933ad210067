//! Webhook dispatch engine for the Pulse notification service.
//!
//! Turns platform events into signed HTTP callbacks: matches an event
//! against the org's subscriptions, signs the payload snapshot, delivers
//! concurrently with a fixed timeout, records every attempt, and retries
//! failures on a bounded backoff schedule.
//!
//! # Architecture
//!
//! ```text
//! event source ──▶ DispatchQueue ──▶ Dispatcher ──▶ DeliveryClient ──▶ subscriber
//!                                        │
//!                                        ▼
//!                                 DispatchStorage (attempt rows)
//!                                        ▲
//!                                        │ claim due rows
//!                                  RetrySweeper
//! ```
//!
//! The attempt row is the retry queue: the sweeper selects due rows by a
//! time-indexed query and claims them atomically before resending, so no
//! separate queue structure exists and concurrent sweepers never send the
//! same row twice.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod retry;
pub mod signer;
pub mod storage;
pub mod sweeper;

pub use client::{ClientConfig, DeliveryClient};
pub use dispatcher::{DispatchSummary, Dispatcher, TestDeliveryOutcome};
pub use error::{DispatchError, Result};
pub use queue::{DispatchQueue, QueueConfig};
pub use storage::{DispatchStorage, PostgresDispatchStorage};
pub use sweeper::{RetrySweeper, SweeperConfig};

/// Fixed client-side timeout for each delivery, in seconds.
///
/// Expiry is the only termination signal for an in-flight send; there is
/// no cooperative cancellation.
pub const DELIVERY_TIMEOUT_SECONDS: u64 = 10;

/// Default maximum number of due attempts one sweep claims.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;

/// Default capacity of the background dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
