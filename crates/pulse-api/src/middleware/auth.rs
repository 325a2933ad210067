//! API key authentication middleware with org isolation.
//!
//! Validates API keys from Authorization headers, performs database lookup
//! with SHA-256 hashing, and injects the owning org for downstream
//! handlers. Every management route is scoped to the authenticated org.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use pulse_core::{storage::Storage, OrgId};

use crate::AppState;

/// Extracts the API key from the Authorization header.
///
/// Supports Bearer token format: `Bearer <api-key>`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(String::from)
}

/// Validates an API key and returns the owning org.
async fn validate_api_key(storage: &Storage, api_key: &str) -> Result<OrgId, AuthError> {
    let key_hash = sha256::digest(api_key.as_bytes());

    match storage
        .api_keys
        .validate(&key_hash)
        .await
        .map_err(|e| AuthError::Database(e.to_string()))?
    {
        Some(org_id) => Ok(org_id),
        None => Err(AuthError::InvalidApiKey),
    }
}

/// Errors that can occur during API key authentication.
#[derive(Debug)]
pub enum AuthError {
    /// The provided API key is invalid, expired, or revoked.
    InvalidApiKey,
    /// A database error occurred while validating the API key.
    Database(String),
    /// The Authorization header is missing from the request.
    MissingHeader,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InvalidApiKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            Self::MissingHeader => (StatusCode::UNAUTHORIZED, "Missing Authorization header"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };

        (status, message).into_response()
    }
}

/// Axum middleware that authenticates requests using API keys.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let api_key = extract_api_key(req.headers()).ok_or(AuthError::MissingHeader)?;

    let org_id = validate_api_key(&state.storage, &api_key).await?;

    req.extensions_mut().insert(org_id);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extract_api_key_from_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer pk_live_12345"));

        assert_eq!(extract_api_key(&headers), Some("pk_live_12345".to_string()));
    }

    #[test]
    fn extract_api_key_returns_none_without_auth_header() {
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn extract_api_key_rejects_non_bearer_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));

        assert_eq!(extract_api_key(&headers), None);
    }
}
