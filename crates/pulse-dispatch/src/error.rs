//! Error types for webhook dispatch operations.
//!
//! Covers subscription lookup failures, network and HTTP delivery errors,
//! signing problems, and queue submission failures. Matcher and store
//! errors propagate to the `dispatch` caller as typed results instead of
//! being logged and swallowed.

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error types for webhook dispatch operations.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The subscription store could not be queried; the dispatch fails
    /// closed and no deliveries are attempted.
    #[error("subscription lookup failed: {message}")]
    SubscriptionLookup {
        /// Underlying store error message.
        message: String,
    },

    /// No subscription exists with the requested ID.
    #[error("subscription {id} not found")]
    SubscriptionNotFound {
        /// The missing subscription ID.
        id: String,
    },

    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure.
        message: String,
    },

    /// The send exceeded the fixed client timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout in seconds.
        timeout_seconds: u64,
    },

    /// Subscriber answered with a 4xx.
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code.
        status_code: u16,
    },

    /// Subscriber answered with a 5xx or other non-2xx.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code.
        status_code: u16,
    },

    /// Payload signing failed.
    #[error("payload signing failed: {message}")]
    Signing {
        /// Signing error message.
        message: String,
    },

    /// Attempt store operation failed.
    #[error("database error: {message}")]
    Database {
        /// Database error message.
        message: String,
    },

    /// Invalid destination or client configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },

    /// The background dispatch queue is at capacity.
    #[error("dispatch queue full")]
    QueueFull,

    /// The background dispatch queue has shut down.
    #[error("dispatch queue closed")]
    QueueClosed,
}

impl DispatchError {
    /// Creates a subscription lookup error.
    pub fn subscription_lookup(message: impl Into<String>) -> Self {
        Self::SubscriptionLookup { message: message.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a signing error.
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing { message: message.into() }
    }

    /// Creates the appropriate HTTP error for a non-2xx status code.
    pub fn http_status(status_code: u16) -> Self {
        if (400..500).contains(&status_code) {
            Self::ClientError { status_code }
        } else {
            Self::ServerError { status_code }
        }
    }

    /// Whether this error describes a delivery outcome (as opposed to an
    /// infrastructure failure inside the dispatch pipeline).
    ///
    /// Delivery outcomes are recorded on the attempt row and scheduled for
    /// retry; pipeline failures propagate to the caller.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::ClientError { .. }
                | Self::ServerError { .. }
        )
    }

    /// Whether the failure class is transient.
    ///
    /// The retry schedule does not branch on this — 4xx responses are
    /// retried the same as 5xx — but logs and the attempt audit trail
    /// record the distinction.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::Database { .. } => true,

            Self::ClientError { .. }
            | Self::SubscriptionLookup { .. }
            | Self::SubscriptionNotFound { .. }
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::QueueFull
            | Self::QueueClosed => false,
        }
    }
}
