//! HTTP management ingress for the Pulse webhook service.
//!
//! Exposes API-key-authenticated, org-scoped subscription management:
//! CRUD, manual test deliveries, and the delivery-attempt audit log, plus
//! unauthenticated health endpoints. The dispatch core itself never writes
//! subscriptions; every mutation enters through this crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use pulse_core::{storage::Storage, Clock};
use pulse_dispatch::Dispatcher;

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use server::{create_router, start_server};

/// Shared state available to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Repository layer for subscriptions, attempts, and API keys.
    pub storage: Arc<Storage>,

    /// Dispatch engine, used for manual test deliveries.
    pub dispatcher: Arc<Dispatcher>,

    /// Clock for request-time timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates the shared application state.
    pub fn new(storage: Arc<Storage>, dispatcher: Arc<Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, dispatcher, clock }
    }
}
