//! Policy enforcement for verification tokens.
//!
//! [`PolicyEnforcer::enforce`] runs a fixed pipeline:
//!
//! 1. Structural format check (no network on failure)
//! 2. Remote verification via `GET /api/v1/jwt/verify/{token}`
//! 3. Rule checks against the returned claims, model, provider, and bundle
//!
//! Rule checks never short-circuit: every violation is collected so the
//! caller sees the complete picture. In fail-closed mode any violation turns
//! into [`ModelSigError::PolicyViolation`]; in fail-open mode the result is
//! returned with `allowed == false`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::client::API_PREFIX;
use crate::error::ModelSigError;
use crate::executor::RequestExecutor;
use crate::jwt::TokenInspector;
use crate::transport::Method;
use crate::types::{PolicyResult, VerificationResult};

/// Reason recorded when a token is not three base64url segments.
pub const REASON_INVALID_FORMAT: &str = "invalid token format";
/// Reason recorded when `iat` cannot be read locally.
pub const REASON_UNKNOWN_AGE: &str = "cannot determine token age";
/// Reason recorded when a deployment id is required but missing.
pub const REASON_MISSING_DEPLOYMENT: &str = "deployment id required but not present";
/// Reason recorded when a model digest is required but missing.
pub const REASON_MISSING_DIGEST: &str = "model digest required but not present";
/// Reason recorded when bundle verification is required but unreported.
pub const REASON_MISSING_BUNDLE: &str =
    "bundle verification required but no bundle information available";
/// Reason recorded when a verified result carries no claims.
pub const REASON_NO_CLAIMS: &str = "no claims found in token";

/// Rules a token must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Claims must carry a non-empty `deployment_id`.
    pub require_deployment_id: bool,
    /// Claims must carry a non-empty `model_digest`.
    pub require_model_digest: bool,
    /// A bundle check with status `"verified"` must be reported.
    pub require_bundle_verification: bool,
    /// Permitted provider ids. Empty means any.
    pub allowed_providers: BTreeSet<String>,
    /// Permitted model ids. Empty means any.
    pub allowed_models: BTreeSet<String>,
    /// Maximum age measured from the token's local `iat` claim.
    pub max_token_age: Option<Duration>,
    /// Return an error instead of a denied result.
    pub fail_closed: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_deployment_id: false,
            require_model_digest: false,
            require_bundle_verification: false,
            allowed_providers: BTreeSet::new(),
            allowed_models: BTreeSet::new(),
            max_token_age: Some(Duration::from_secs(900)),
            fail_closed: true,
        }
    }
}

impl PolicyConfig {
    /// Restrict to the given providers.
    #[must_use]
    pub fn with_allowed_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given models.
    #[must_use]
    pub fn with_allowed_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_models = models.into_iter().map(Into::into).collect();
        self
    }
}

/// Rules for [`PolicyEnforcer::quick_check`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuickCheck {
    /// Require a deployment id.
    pub require_deployment: bool,
    /// Require a model digest.
    pub require_digest: bool,
    /// Maximum token age. `None` skips the age check.
    pub max_age: Option<Duration>,
    /// Permitted provider ids. Empty means any.
    pub allowed_providers: Vec<String>,
}

impl From<QuickCheck> for PolicyConfig {
    fn from(check: QuickCheck) -> Self {
        Self {
            require_deployment_id: check.require_deployment,
            require_model_digest: check.require_digest,
            require_bundle_verification: false,
            allowed_providers: check.allowed_providers.into_iter().collect(),
            allowed_models: BTreeSet::new(),
            max_token_age: check.max_age,
            fail_closed: false,
        }
    }
}

/// Evaluates tokens against a [`PolicyConfig`].
pub struct PolicyEnforcer {
    executor: Arc<RequestExecutor>,
    config: PolicyConfig,
}

impl PolicyEnforcer {
    /// Create an enforcer.
    pub fn new(executor: Arc<RequestExecutor>, config: PolicyConfig) -> Self {
        Self { executor, config }
    }

    /// Current configuration.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Replace the configuration.
    pub fn set_config(&mut self, config: PolicyConfig) {
        self.config = config;
    }

    /// Evaluate a token, failing only in fail-closed mode with violations.
    #[instrument(skip_all, fields(fail_closed = self.config.fail_closed))]
    pub fn enforce(&self, token: &str) -> Result<PolicyResult, ModelSigError> {
        let result = self.evaluate(token);

        if result.allowed() {
            debug!("Policy: token allowed");
            return Ok(result);
        }

        warn!(reasons = ?result.reasons(), "Policy: violations found");
        if self.config.fail_closed {
            return Err(ModelSigError::PolicyViolation {
                reasons: result.reasons().to_vec(),
                result: Box::new(result),
            });
        }
        Ok(result)
    }

    /// Evaluate a token without applying fail-closed semantics.
    pub fn evaluate(&self, token: &str) -> PolicyResult {
        if !TokenInspector::is_valid_format(token) {
            return PolicyResult::from_reasons(
                vec![REASON_INVALID_FORMAT.into()],
                VerificationResult::invalid("Invalid token format"),
            );
        }

        let verification = match self.fetch_verification(token) {
            Ok(verification) => verification,
            Err(e) => {
                let message = e.to_string();
                return PolicyResult::from_reasons(
                    vec![format!("verification request failed: {}", message)],
                    VerificationResult::invalid(message),
                );
            },
        };

        if !verification.is_valid() {
            let reason = format!(
                "token verification failed: {}",
                verification.error().unwrap_or("unknown error")
            );
            return PolicyResult::from_reasons(vec![reason], verification);
        }

        let reasons = check_rules(&self.config, token, &verification, Utc::now().timestamp());
        PolicyResult::from_reasons(reasons, verification)
    }

    /// Verify a token remotely. Never fails; errors become invalid results.
    pub fn verify_token(&self, token: &str) -> VerificationResult {
        if !TokenInspector::is_valid_format(token) {
            return VerificationResult::invalid("Invalid token format");
        }
        self.fetch_verification(token)
            .unwrap_or_else(|e| VerificationResult::invalid(format!("Verification failed: {}", e)))
    }

    /// Ask the service to bind `response_text` to the token.
    ///
    /// The hash is computed server-side; see
    /// [`hash_response`](crate::jwt::hash_response) to compare locally.
    #[instrument(skip_all, fields(response_len = response_text.len()))]
    pub fn bind_response(&self, token: &str, response_text: &str) -> Result<Value, ModelSigError> {
        if !TokenInspector::is_valid_format(token) {
            return Err(ModelSigError::validation("Invalid token format"));
        }
        if response_text.is_empty() {
            return Err(ModelSigError::validation(
                "Response text must be a non-empty string",
            ));
        }

        let ack = self.executor.execute(
            Method::Post,
            &format!("{}/jwt/{}/bind-response", API_PREFIX, token),
            Some(&json!({ "response_text": response_text })),
        )?;
        info!("Response bound to token");
        Ok(ack)
    }

    /// Best-effort boolean check with one-off rules. Never fails.
    pub fn quick_check(&self, token: &str, rules: QuickCheck) -> bool {
        let enforcer = PolicyEnforcer::new(Arc::clone(&self.executor), rules.into());
        enforcer
            .enforce(token)
            .map(|result| result.allowed())
            .unwrap_or(false)
    }

    fn fetch_verification(&self, token: &str) -> Result<VerificationResult, ModelSigError> {
        let body = self.executor.execute(
            Method::Get,
            &format!("{}/jwt/verify/{}", API_PREFIX, token),
            None,
        )?;
        Ok(VerificationResult::from_response(&body))
    }
}

/// Apply every configured rule to a verified result.
///
/// `now` is Unix seconds, used for the age check against the token's own
/// `iat` claim.
pub fn check_rules(
    config: &PolicyConfig,
    token: &str,
    verification: &VerificationResult,
    now: i64,
) -> Vec<String> {
    let mut violations = Vec::new();

    let claims = match verification.claims() {
        Some(claims) => claims,
        None => {
            violations.push(REASON_NO_CLAIMS.to_string());
            return violations;
        },
    };

    if let Some(max_age) = config.max_token_age {
        let max_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        match TokenInspector::age_at(token, now) {
            None => violations.push(REASON_UNKNOWN_AGE.to_string()),
            Some(age) if age > max_secs => {
                violations.push(format!("token is too old: {}s > {}s", age, max_secs));
            },
            Some(_) => {},
        }
    }

    if config.require_deployment_id && claims.deployment_id().is_none() {
        violations.push(REASON_MISSING_DEPLOYMENT.to_string());
    }

    if config.require_model_digest && claims.model_digest().is_none() {
        violations.push(REASON_MISSING_DIGEST.to_string());
    }

    if config.require_bundle_verification {
        match verification.bundle_check() {
            None => violations.push(REASON_MISSING_BUNDLE.to_string()),
            Some(bundle) if !bundle.is_verified() => violations.push(format!(
                "bundle verification failed: status is '{}'",
                bundle.status
            )),
            Some(_) => {},
        }
    }

    if !config.allowed_providers.is_empty() {
        let provider = verification.provider().map(|p| p.id.as_str());
        if !provider.is_some_and(|id| config.allowed_providers.contains(id)) {
            violations.push(format!(
                "provider '{}' is not in allowed list",
                provider.unwrap_or("unknown")
            ));
        }
    }

    if !config.allowed_models.is_empty() {
        let model = verification.model().map(|m| m.id.as_str());
        if !model.is_some_and(|id| config.allowed_models.contains(id)) {
            violations.push(format!(
                "model '{}' is not in allowed list",
                model.unwrap_or("unknown")
            ));
        }
    }

    violations
}
