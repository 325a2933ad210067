//! HMAC-SHA256 payload signing for outbound webhooks.
//!
//! Every delivery carries a signature over the exact body bytes sent,
//! keyed by the subscription secret. Subscribers recompute the HMAC to
//! authenticate the callback; verification uses constant-time comparison.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix carried by every signature value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The secret key was rejected by the MAC implementation.
    InvalidSecret,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSecret => write!(f, "invalid secret key"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Signs a payload with the subscription secret.
///
/// Computes HMAC-SHA256 over the payload bytes and returns
/// `"sha256=" + hex(digest)`. Deterministic for identical payload bytes;
/// callers must sign the stored payload snapshot so retries produce the
/// signature that matches what was actually sent.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the key is rejected.
pub fn sign(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)))
}

/// Verifies a signature against a payload and secret.
///
/// Recomputes the expected signature and compares with constant-time byte
/// equality. Returns false for malformed signatures or a key rejection
/// rather than surfacing an error, so verification can never be used as an
/// oracle.
pub fn verify(signature: &str, payload: &[u8], secret: &str) -> bool {
    let Ok(expected) = sign(payload, secret) else {
        return false;
    };

    constant_time_eq(signature.as_bytes(), expected.as_bytes())
}

/// Constant-time byte comparison.
///
/// Never short-circuits on the first mismatching byte, so timing reveals
/// nothing about how much of the signature was correct.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_produces_prefixed_hex_digest() {
        let signature = sign(b"{\"event\":\"task.completed\"}", "whsec_test").unwrap();

        let hex_part = signature.strip_prefix(SIGNATURE_PREFIX).expect("prefix present");
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signing_is_deterministic() {
        let first = sign(b"payload", "secret").unwrap();
        let second = sign(b"payload", "secret").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn verify_round_trip() {
        let payload = b"{\"event\":\"email.received\",\"data\":{}}";
        let signature = sign(payload, "whsec_abc123").unwrap();

        assert!(verify(&signature, payload, "whsec_abc123"));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let signature = sign(b"original", "secret").unwrap();
        assert!(!verify(&signature, b"originaX", "secret"));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let signature = sign(b"payload", "secret-a").unwrap();
        assert!(!verify(&signature, b"payload", "secret-b"));
    }

    #[test]
    fn verify_rejects_malformed_signature() {
        assert!(!verify("", b"payload", "secret"));
        assert!(!verify("sha256=", b"payload", "secret"));
        assert!(!verify("not-a-signature", b"payload", "secret"));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq(b"short", b"longer-value"));
        assert!(constant_time_eq(b"same", b"same"));
    }
}
