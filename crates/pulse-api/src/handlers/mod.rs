//! Request handlers for the management ingress.

pub mod health;
pub mod subscriptions;

pub use health::{health_check, liveness_check, readiness_check};
pub use subscriptions::{
    create_subscription, delete_subscription, get_subscription, list_attempts,
    list_subscriptions, test_subscription, update_subscription,
};
