//! Structural inspection of verification tokens.
//!
//! Handles the standard 3-part JWT format: `header.payload.signature`.
//!
//! Nothing here verifies a signature. Results are hints for fast local
//! checks (age, expiry, shape) and must never be the sole basis of an
//! access decision; the verification service is authoritative.

use base64::Engine;
use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::JwtClaims;

/// Local expiry state of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
    /// `exp` is in the past.
    Expired,
    /// `exp` is now or in the future.
    NotExpired,
    /// The token could not be parsed or has no `exp` claim.
    Unknown,
}

/// Non-authoritative token inspector.
pub struct TokenInspector;

impl TokenInspector {
    /// Whether the token has three non-empty base64url segments.
    pub fn is_valid_format(token: &str) -> bool {
        let parts: Vec<&str> = token.split('.').collect();
        parts.len() == 3 && parts.iter().all(|part| is_base64url(part))
    }

    /// Decode the payload segment into a claim map.
    ///
    /// Returns `None` on a wrong segment count, bad base64, or a payload
    /// that is not a JSON object.
    pub fn parse(token: &str) -> Option<Map<String, Value>> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return None;
        }

        let bytes = base64url_decode(parts[1])?;
        match serde_json::from_slice::<Value>(&bytes).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Decode the payload into typed claims.
    pub fn claims(token: &str) -> Option<JwtClaims> {
        serde_json::from_value(Value::Object(Self::parse(token)?)).ok()
    }

    /// Compare `exp` against the current time.
    pub fn is_expired(token: &str) -> ExpiryStatus {
        Self::is_expired_at(token, Utc::now().timestamp())
    }

    /// Compare `exp` against `now` (Unix seconds).
    pub fn is_expired_at(token: &str, now: i64) -> ExpiryStatus {
        match Self::parse(token).and_then(|claims| numeric_claim(&claims, "exp")) {
            Some(exp) if exp < now => ExpiryStatus::Expired,
            Some(_) => ExpiryStatus::NotExpired,
            None => ExpiryStatus::Unknown,
        }
    }

    /// Seconds since `iat`, or `None` if unknown.
    pub fn age(token: &str) -> Option<i64> {
        Self::age_at(token, Utc::now().timestamp())
    }

    /// Seconds between `iat` and `now` (Unix seconds).
    ///
    /// `None` when the difference does not fit in an `i64`.
    pub fn age_at(token: &str, now: i64) -> Option<i64> {
        let iat = numeric_claim(&Self::parse(token)?, "iat")?;
        now.checked_sub(iat)
    }
}

/// SHA-256 of a model response, as lowercase hex.
///
/// Matches the digest the service stores in `response_hash` after
/// binding, so callers can compare a response against a bound token.
pub fn hash_response(response_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(response_text.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_base64url(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Decode base64url, restoring any stripped padding.
fn base64url_decode(input: &str) -> Option<Vec<u8>> {
    let trimmed = input.trim_end_matches('=');
    let mut padded = String::with_capacity(trimmed.len() + 3);
    padded.push_str(trimmed);
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    base64::engine::general_purpose::URL_SAFE
        .decode(padded)
        .ok()
}

fn numeric_claim(claims: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = claims.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}
