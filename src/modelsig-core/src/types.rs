//! Wire and result types for the ModelSignature API.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelSigError;

// =============================================================================
// Verification creation
// =============================================================================

/// A verification token issued by `POST /create-verification`.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResponse {
    /// URL the end user can open to confirm the model's identity.
    pub verification_url: String,
    /// Opaque token. Not trusted locally.
    pub token: String,
    /// Lifetime in seconds, counted from `created_at`.
    pub expires_in: u64,
    /// Server-side creation time, if reported.
    pub created_at: Option<DateTime<Utc>>,
    /// The full response body.
    pub raw: Value,
}

impl VerificationResponse {
    /// Decode a create-verification response body.
    pub fn from_json(raw: Value) -> Result<Self, ModelSigError> {
        let verification_url = required_str(&raw, "verification_url")?;
        let token = required_str(&raw, "token")?;
        let expires_in = raw
            .get("expires_in")
            .and_then(Value::as_u64)
            .ok_or_else(|| missing_field("expires_in"))?;
        let created_at = raw.get("created_at").and_then(parse_timestamp);

        Ok(Self {
            verification_url,
            token,
            expires_in,
            created_at,
            raw,
        })
    }

    /// When the token stops being reusable, if known.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = chrono::Duration::seconds(i64::try_from(self.expires_in).ok()?);
        self.created_at?.checked_add_signed(lifetime)
    }

    /// Whether the token is expired at `now`.
    ///
    /// A response without a usable `created_at` is always expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expiry) => now > expiry,
            None => true,
        }
    }

    /// Whether the token is expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Result of `POST /providers/register`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRegistration {
    /// Assigned provider id.
    pub provider_id: String,
    /// API key for the new provider.
    pub api_key: String,
    /// Server message.
    pub message: String,
    /// The full response body.
    pub raw: Value,
}

impl ProviderRegistration {
    pub(crate) fn from_json(raw: Value) -> Self {
        Self {
            provider_id: lenient_str(&raw, "provider_id").unwrap_or_default(),
            api_key: lenient_str(&raw, "api_key").unwrap_or_default(),
            message: lenient_str(&raw, "message").unwrap_or_default(),
            raw,
        }
    }
}

/// Result of `POST /models/register`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRegistration {
    /// Assigned model id.
    pub model_id: String,
    /// Registered name.
    pub name: String,
    /// Registered version.
    pub version: String,
    /// Server message.
    pub message: String,
    /// The full response body.
    pub raw: Value,
}

impl ModelRegistration {
    /// Name and version fall back to the submitted values.
    pub(crate) fn from_json(raw: Value, name: &str, version: &str) -> Self {
        Self {
            model_id: lenient_str(&raw, "model_id").unwrap_or_default(),
            name: lenient_str(&raw, "name").unwrap_or_else(|| name.to_string()),
            version: lenient_str(&raw, "version").unwrap_or_else(|| version.to_string()),
            message: lenient_str(&raw, "message").unwrap_or_default(),
            raw,
        }
    }
}

// =============================================================================
// Token verification
// =============================================================================

/// Claims reported by the verification service.
///
/// Every field is optional: a claim missing from the payload is `None`,
/// never an empty string or zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Model the token was issued for.
    pub model_id: Option<String>,
    /// Provider owning the model.
    pub provider_id: Option<String>,
    /// End-user fingerprint.
    #[serde(rename = "user_fp")]
    pub user_fingerprint: Option<String>,
    /// Deployment the model runs in.
    pub deployment_id: Option<String>,
    /// Digest of the model artifact.
    pub model_digest: Option<String>,
    /// Hash of the bound response, if any.
    pub response_hash: Option<String>,
    /// Whether a response has been bound to this token.
    pub bound_to_response: Option<bool>,
    /// Issued at (Unix seconds).
    #[serde(rename = "iat")]
    pub issued_at: Option<i64>,
    /// Expiry (Unix seconds).
    #[serde(rename = "exp")]
    pub expires_at: Option<i64>,
    /// Token id.
    #[serde(rename = "jti")]
    pub token_id: Option<String>,
}

impl JwtClaims {
    /// Deployment id, if present and non-empty.
    pub fn deployment_id(&self) -> Option<&str> {
        non_empty(&self.deployment_id)
    }

    /// Model digest, if present and non-empty.
    pub fn model_digest(&self) -> Option<&str> {
        non_empty(&self.model_digest)
    }

    /// Whether the token is bound to a response.
    pub fn is_bound_to_response(&self) -> bool {
        self.bound_to_response.unwrap_or(false)
    }
}

/// Model descriptor attached to a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Model version.
    pub version: String,
    /// Model type (e.g. `llm`).
    #[serde(rename = "type")]
    pub model_type: Option<String>,
    /// Registered artifact digest.
    pub model_digest: Option<String>,
    /// Location of the signed bundle.
    pub sigstore_bundle_url: Option<String>,
    /// Last known bundle status.
    pub bundle_status: Option<String>,
    /// When the bundle was last checked.
    pub bundle_last_checked: Option<String>,
}

/// Provider descriptor attached to a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider website.
    pub website: Option<String>,
    /// Verification tier assigned by the service.
    pub verification_level: Option<String>,
    /// Whether the provider's domain has been verified.
    pub domain_verified: Option<bool>,
}

/// Status of the external signed-bundle attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleCheck {
    /// `"verified"` when the bundle attestation passed.
    pub status: String,
    /// When the bundle was last checked.
    pub last_checked: Option<String>,
    /// Service-specific detail payload.
    pub details: Option<Value>,
}

impl BundleCheck {
    /// Whether the status is exactly `"verified"`.
    pub fn is_verified(&self) -> bool {
        self.status == "verified"
    }
}

/// Outcome of a remote token verification.
///
/// Constructed only through [`VerificationResult::verified`] and
/// [`VerificationResult::invalid`], so a valid result always has claims
/// and an invalid one always has an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    valid: bool,
    claims: Option<JwtClaims>,
    model: Option<ModelInfo>,
    provider: Option<ProviderInfo>,
    bundle_check: Option<BundleCheck>,
    error: Option<String>,
}

impl VerificationResult {
    /// A successful verification.
    pub fn verified(
        claims: JwtClaims,
        model: Option<ModelInfo>,
        provider: Option<ProviderInfo>,
        bundle_check: Option<BundleCheck>,
    ) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            model,
            provider,
            bundle_check,
            error: None,
        }
    }

    /// A failed verification.
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            model: None,
            provider: None,
            bundle_check: None,
            error: Some(error.into()),
        }
    }

    /// Decode a `GET /jwt/verify/{token}` response body.
    ///
    /// Never fails: malformed bodies become invalid results.
    pub fn from_response(body: &Value) -> Self {
        if !body.get("valid").and_then(Value::as_bool).unwrap_or(false) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .unwrap_or("Unknown verification error");
            return Self::invalid(error);
        }

        match Self::decode_verified(body) {
            Ok(Some(result)) => result,
            Ok(None) => Self::invalid("No claims found in token"),
            Err(e) => Self::invalid(format!("Malformed verification response: {}", e)),
        }
    }

    fn decode_verified(body: &Value) -> Result<Option<Self>, serde_json::Error> {
        let claims = match nested::<JwtClaims>(body, "claims")? {
            Some(claims) => claims,
            None => return Ok(None),
        };
        Ok(Some(Self::verified(
            claims,
            nested(body, "model")?,
            nested(body, "provider")?,
            nested(body, "bundle_check")?,
        )))
    }

    /// Whether the service accepted the token.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Claims, present iff valid.
    pub fn claims(&self) -> Option<&JwtClaims> {
        self.claims.as_ref()
    }

    /// Model descriptor, if reported.
    pub fn model(&self) -> Option<&ModelInfo> {
        self.model.as_ref()
    }

    /// Provider descriptor, if reported.
    pub fn provider(&self) -> Option<&ProviderInfo> {
        self.provider.as_ref()
    }

    /// Bundle attestation status, if reported.
    pub fn bundle_check(&self) -> Option<&BundleCheck> {
        self.bundle_check.as_ref()
    }

    /// Failure reason, present iff invalid.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

// =============================================================================
// Policy result
// =============================================================================

/// Outcome of a policy evaluation.
///
/// `allowed` is derived from `reasons`, so an allowed result never carries
/// reasons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyResult {
    allowed: bool,
    reasons: Vec<String>,
    verification: VerificationResult,
}

impl PolicyResult {
    /// Build a result from the accumulated violations.
    pub fn from_reasons(reasons: Vec<String>, verification: VerificationResult) -> Self {
        Self {
            allowed: reasons.is_empty(),
            reasons,
            verification,
        }
    }

    /// Whether the token satisfied every rule.
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Violations in evaluation order.
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// The verification the rules were evaluated against.
    pub fn verification(&self) -> &VerificationResult {
        &self.verification
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Decode `body[key]`; missing, null, or `{}` is `None`.
fn nested<T: DeserializeOwned>(body: &Value, key: &str) -> Result<Option<T>, serde_json::Error> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn required_str(raw: &Value, key: &str) -> Result<String, ModelSigError> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing_field(key))
}

fn missing_field(key: &str) -> ModelSigError {
    ModelSigError::Api {
        message: format!("Invalid response: missing '{}'", key),
    }
}

/// String field, accepting numbers as their decimal text.
fn lenient_str(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an RFC 3339, naive ISO-8601 (taken as UTC), or Unix-seconds timestamp.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => Utc.timestamp_opt(n.as_i64()?, 0).single(),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        },
        _ => None,
    }
}
