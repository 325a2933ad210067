//! Health check handlers for service monitoring.
//!
//! Provides liveness, readiness, and health endpoints with a database
//! connectivity check for orchestration systems.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status.
    pub status: HealthStatus,
    /// When the check was performed.
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks.
    pub checks: HealthChecks,
    /// Service version.
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Critical systems failing.
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Database connectivity check.
    pub database: ComponentHealth,
}

/// Health status for one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Whether the component is up.
    pub up: bool,
    /// Error message when the component is down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Primary health check endpoint.
///
/// Called frequently by orchestration systems and load balancers, so it
/// stays limited to a trivial database query.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    debug!("performing health check");

    let database = match state.storage.health_check().await {
        Ok(()) => ComponentHealth { up: true, message: None },
        Err(e) => {
            error!("database health check failed: {e}");
            ComponentHealth { up: false, message: Some(e.to_string()) }
        },
    };

    let status =
        if database.up { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
    let status_code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        timestamp: state.clock.now(),
        checks: HealthChecks { database },
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response)).into_response()
}

/// Liveness probe: the process is running and serving requests.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: the service can reach its database.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    match state.storage.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!("readiness check failed: {e}");
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}
