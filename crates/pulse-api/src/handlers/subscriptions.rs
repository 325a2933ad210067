//! Subscription management handlers with validation and org scoping.
//!
//! Create/list/update/delete for webhook subscriptions, the synchronous
//! test-delivery action, and the delivery-attempt audit log. Configuration
//! errors — bad URLs, empty or unknown event sets — are rejected here,
//! before anything reaches the dispatch core. The secret is generated at
//! create time and returned exactly once.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use pulse_core::{
    models::{AttemptStatus, DeliveryAttempt, OrgId, Subscription, SubscriptionId},
    EventType,
};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::AppState;

/// Webhook secrets carry this prefix so they are recognizable in
/// subscriber configuration.
const SECRET_PREFIX: &str = "whsec_";

/// Length of the random part of a generated secret.
const SECRET_LENGTH: usize = 40;

/// Request body for subscription creation.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Destination URL for webhook delivery.
    pub url: String,
    /// Event types to deliver, by wire name.
    pub event_types: Vec<String>,
}

/// Request body for subscription updates.
///
/// Absent fields are left unchanged; the secret is immutable and has no
/// field here at all.
#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    /// New destination URL.
    pub url: Option<String>,
    /// Replacement event set.
    pub event_types: Option<Vec<String>>,
    /// Enable or disable delivery.
    pub active: Option<bool>,
}

/// Subscription representation returned by the API.
///
/// Never includes the secret; see [`CreatedSubscriptionResponse`].
#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    /// Subscription identifier.
    pub id: Uuid,
    /// Destination URL.
    pub url: String,
    /// Subscribed event types, by wire name.
    pub event_types: Vec<String>,
    /// Whether the subscription receives deliveries.
    pub active: bool,
    /// When a delivery last succeeded.
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// When the subscription was last modified.
    pub updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id.0,
            url: subscription.url,
            event_types: subscription.event_types.0.iter().map(|e| e.to_string()).collect(),
            active: subscription.active,
            last_triggered_at: subscription.last_triggered_at,
            created_at: subscription.created_at,
            updated_at: subscription.updated_at,
        }
    }
}

/// Create response: the only place the secret ever appears.
#[derive(Debug, Serialize)]
pub struct CreatedSubscriptionResponse {
    /// The created subscription.
    #[serde(flatten)]
    pub subscription: SubscriptionResponse,
    /// Shared signing secret. Shown once; store it now.
    pub secret: String,
}

/// Delivery attempt representation for the audit log.
#[derive(Debug, Serialize)]
pub struct AttemptResponse {
    /// Attempt identifier.
    pub id: Uuid,
    /// Event type delivered.
    pub event_type: String,
    /// Payload snapshot that was (or will be) sent.
    pub payload: serde_json::Value,
    /// Lifecycle status.
    pub status: String,
    /// Zero-based index of the most recent send.
    pub attempt_count: i32,
    /// HTTP status of the last response, if any.
    pub response_code: Option<i32>,
    /// Truncated response body or error message.
    pub response_body: Option<String>,
    /// When the next retry is due; null means none.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When dispatch created the attempt.
    pub created_at: DateTime<Utc>,
    /// When the attempt reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<DeliveryAttempt> for AttemptResponse {
    fn from(attempt: DeliveryAttempt) -> Self {
        Self {
            id: attempt.id.0,
            event_type: attempt.event_type.to_string(),
            payload: attempt.payload.0,
            status: attempt.status.to_string(),
            attempt_count: attempt.attempt_count,
            response_code: attempt.response_code,
            response_body: attempt.response_body,
            next_retry_at: attempt.next_retry_at,
            created_at: attempt.created_at,
            completed_at: attempt.completed_at,
        }
    }
}

/// Query parameters for the attempts audit listing.
#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    /// Filter by status (`pending`, `success`, `failed`).
    pub status: Option<String>,
    /// Maximum rows returned.
    pub limit: Option<i64>,
}

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable error description.
    pub message: String,
}

/// Errors surfaced by the subscription handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Request failed validation.
    Validation {
        /// Stable error code.
        code: &'static str,
        /// Description of what was rejected.
        message: String,
    },
    /// No such subscription in the caller's org.
    NotFound,
    /// Storage or dispatch infrastructure failure.
    Internal(String),
}

impl ApiError {
    fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Validation { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::NotFound => {
                (StatusCode::NOT_FOUND, "not_found", "subscription not found".to_string())
            },
            Self::Internal(message) => {
                warn!(error = %message, "request failed with internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error".to_string())
            },
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorDetail { code: code.to_string(), message },
            }),
        )
            .into_response()
    }
}

impl From<pulse_core::CoreError> for ApiError {
    fn from(err: pulse_core::CoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Creates a subscription for the authenticated org.
///
/// Validates the URL and event set, generates the secret, and returns it
/// exactly once in the response.
#[instrument(name = "create_subscription", skip(state, request), fields(org_id = %org_id))]
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(org_id): Extension<OrgId>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<Response, ApiError> {
    validate_url(&request.url)?;
    let event_types = parse_event_types(&request.event_types)?;

    let secret = generate_secret();
    let subscription =
        Subscription::new(org_id, request.url, secret.clone(), event_types, state.clock.now());

    state.storage.subscriptions.create(&subscription).await?;

    info!(subscription_id = %subscription.id, "subscription created");

    Ok((
        StatusCode::CREATED,
        Json(CreatedSubscriptionResponse { subscription: subscription.into(), secret }),
    )
        .into_response())
}

/// Lists the org's subscriptions, newest first.
#[instrument(name = "list_subscriptions", skip(state), fields(org_id = %org_id))]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(org_id): Extension<OrgId>,
) -> Result<Json<Vec<SubscriptionResponse>>, ApiError> {
    let subscriptions = state.storage.subscriptions.find_by_org(org_id, None).await?;

    Ok(Json(subscriptions.into_iter().map(SubscriptionResponse::from).collect()))
}

/// Fetches one subscription of the org.
#[instrument(name = "get_subscription", skip(state), fields(org_id = %org_id))]
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(org_id): Extension<OrgId>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = find_owned(&state, org_id, SubscriptionId(id)).await?;

    Ok(Json(subscription.into()))
}

/// Updates URL, event set, or active flag.
///
/// The secret is immutable after creation and cannot be changed here.
#[instrument(name = "update_subscription", skip(state, request), fields(org_id = %org_id))]
pub async fn update_subscription(
    State(state): State<AppState>,
    Extension(org_id): Extension<OrgId>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let id = SubscriptionId(id);
    let mut subscription = find_owned(&state, org_id, id).await?;

    if let Some(url) = request.url {
        validate_url(&url)?;
        subscription.url = url;
    }
    if let Some(raw_events) = request.event_types {
        subscription.event_types = sqlx::types::Json(parse_event_types(&raw_events)?);
    }
    if let Some(active) = request.active {
        subscription.active = active;
    }
    subscription.updated_at = state.clock.now();

    let updated = state
        .storage
        .subscriptions
        .update(
            id,
            &subscription.url,
            &subscription.event_types.0,
            subscription.active,
            subscription.updated_at,
        )
        .await?;
    if updated == 0 {
        return Err(ApiError::NotFound);
    }

    info!(subscription_id = %id, "subscription updated");

    Ok(Json(subscription.into()))
}

/// Deletes a subscription of the org.
#[instrument(name = "delete_subscription", skip(state), fields(org_id = %org_id))]
pub async fn delete_subscription(
    State(state): State<AppState>,
    Extension(org_id): Extension<OrgId>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.storage.subscriptions.delete(org_id, SubscriptionId(id)).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound);
    }

    info!(subscription_id = %id, "subscription deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Sends a synthetic test event and returns the outcome synchronously.
///
/// The result reflects the immediate HTTP exchange; nothing is persisted
/// and no retry cycle begins.
#[instrument(name = "test_subscription", skip(state), fields(org_id = %org_id))]
pub async fn test_subscription(
    State(state): State<AppState>,
    Extension(org_id): Extension<OrgId>,
    Path(id): Path<Uuid>,
) -> Result<Json<pulse_dispatch::TestDeliveryOutcome>, ApiError> {
    let id = SubscriptionId(id);
    // Org-scoped lookup first, so one org can never probe another's URLs.
    find_owned(&state, org_id, id).await?;

    let outcome = state
        .dispatcher
        .test_delivery(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(outcome))
}

/// Lists the delivery-attempt audit log for a subscription.
///
/// `?status=failed` is the dead-letter view: terminal failures stay
/// queryable here after their retry budget is gone.
#[instrument(name = "list_attempts", skip(state, query), fields(org_id = %org_id))]
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(org_id): Extension<OrgId>,
    Path(id): Path<Uuid>,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<Vec<AttemptResponse>>, ApiError> {
    let id = SubscriptionId(id);
    find_owned(&state, org_id, id).await?;

    let status = query.status.as_deref().map(parse_status).transpose()?;
    let attempts =
        state.storage.delivery_attempts.find_by_subscription(id, status, query.limit).await?;

    Ok(Json(attempts.into_iter().map(AttemptResponse::from).collect()))
}

/// Fetches a subscription, enforcing org ownership.
async fn find_owned(
    state: &AppState,
    org_id: OrgId,
    id: SubscriptionId,
) -> Result<Subscription, ApiError> {
    state
        .storage
        .subscriptions
        .find_by_id_for_org(org_id, id)
        .await?
        .ok_or(ApiError::NotFound)
}

/// Validates that a destination is a syntactically valid http(s) URL.
fn validate_url(raw: &str) -> Result<(), ApiError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ApiError::validation("invalid_url", format!("invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ApiError::validation(
            "invalid_url",
            format!("unsupported URL scheme: {scheme}"),
        )),
    }
}

/// Parses and validates an event set: non-empty, all from the closed
/// vocabulary.
fn parse_event_types(raw: &[String]) -> Result<Vec<EventType>, ApiError> {
    if raw.is_empty() {
        return Err(ApiError::validation(
            "empty_event_types",
            "at least one event type is required",
        ));
    }

    let mut event_types = Vec::with_capacity(raw.len());
    for name in raw {
        let event_type = name.parse::<EventType>().map_err(|_| {
            ApiError::validation("unknown_event_type", format!("unknown event type: {name}"))
        })?;
        if !event_types.contains(&event_type) {
            event_types.push(event_type);
        }
    }

    Ok(event_types)
}

/// Parses an attempt-status filter value.
fn parse_status(raw: &str) -> Result<AttemptStatus, ApiError> {
    match raw {
        "pending" => Ok(AttemptStatus::Pending),
        "success" => Ok(AttemptStatus::Success),
        "failed" => Ok(AttemptStatus::Failed),
        other => Err(ApiError::validation(
            "invalid_status",
            format!("invalid status filter: {other}"),
        )),
    }
}

/// Generates a fresh webhook signing secret.
fn generate_secret() -> String {
    let token: String =
        rand::rng().sample_iter(&Alphanumeric).take(SECRET_LENGTH).map(char::from).collect();
    format!("{SECRET_PREFIX}{token}")
}
