//! ModelSignature API client.
//!
//! ## Endpoints
//!
//! - `POST /api/v1/create-verification` - Issue a verification token
//! - `GET /api/v1/verify/{token}` - Raw verification status
//! - `POST /api/v1/providers/register` - Register a provider
//! - `POST /api/v1/models/register` - Register a model

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use crate::cache::{CacheKey, VerificationCache};
use crate::config::ClientConfig;
use crate::error::ModelSigError;
use crate::executor::RequestExecutor;
use crate::policy::{PolicyConfig, PolicyEnforcer};
use crate::transport::Method;
use crate::types::{ModelRegistration, ProviderRegistration, VerificationResponse};

/// Path prefix for every API endpoint.
pub const API_PREFIX: &str = "/api/v1";

/// Provider registration request.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSignup {
    /// Legal or trading name.
    pub company_name: String,
    /// Contact email.
    pub email: String,
    /// Public website.
    pub website: String,
    /// Additional fields passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Model registration request.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSubmission {
    /// Display name.
    pub model_name: String,
    /// Version string.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// Endpoint the model is served from.
    pub api_endpoint: String,
    /// Model type (e.g. `language`).
    pub model_type: String,
    /// Additional fields passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Client for the ModelSignature verification service.
///
/// Safe to share across threads; the token cache is internally locked.
pub struct ModelSignatureClient {
    executor: Arc<RequestExecutor>,
    cache: VerificationCache,
}

impl ModelSignatureClient {
    /// Create a client over the blocking HTTP transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_executor(Arc::new(RequestExecutor::new(&config)))
    }

    /// Create a client around an existing executor.
    pub fn with_executor(executor: Arc<RequestExecutor>) -> Self {
        Self {
            executor,
            cache: VerificationCache::new(),
        }
    }

    /// The shared request executor.
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// The verification token cache.
    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    /// Return a cached token for (model, fingerprint) or create a new one.
    ///
    /// `metadata` is sent only when it is a non-empty object.
    #[instrument(skip(self, user_fingerprint, metadata), fields(model_id = %model_id))]
    pub fn create_verification(
        &self,
        model_id: &str,
        user_fingerprint: &str,
        metadata: Option<&Value>,
    ) -> Result<VerificationResponse, ModelSigError> {
        validate_model_id(model_id)?;
        if user_fingerprint.trim().is_empty() {
            return Err(ModelSigError::validation("user_fingerprint cannot be empty"));
        }

        let key = CacheKey::new(model_id, user_fingerprint);
        self.cache.get_or_create(key, || {
            let mut body = json!({
                "model_id": model_id,
                "user_fingerprint": user_fingerprint,
            });
            if let Some(meta) = metadata.filter(|m| has_content(m)) {
                body["metadata"] = meta.clone();
            }

            let raw = self.executor.execute(
                Method::Post,
                &format!("{}/create-verification", API_PREFIX),
                Some(&body),
            )?;
            let response = VerificationResponse::from_json(raw)?;
            info!(expires_in = response.expires_in, "Verification created");
            Ok(response)
        })
    }

    /// Fetch the raw verification status for a token.
    pub fn verify_token(&self, token: &str) -> Result<Value, ModelSigError> {
        if token.is_empty() {
            return Err(ModelSigError::validation("token cannot be empty"));
        }
        self.executor.execute(
            Method::Get,
            &format!("{}/verify/{}", API_PREFIX, urlencoding::encode(token)),
            None,
        )
    }

    /// Register a provider account.
    #[instrument(skip(self, signup), fields(company = %signup.company_name))]
    pub fn register_provider(
        &self,
        signup: &ProviderSignup,
    ) -> Result<ProviderRegistration, ModelSigError> {
        let body = to_body(signup)?;
        let raw = self.executor.execute(
            Method::Post,
            &format!("{}/providers/register", API_PREFIX),
            Some(&body),
        )?;
        Ok(ProviderRegistration::from_json(raw))
    }

    /// Register a model under the authenticated provider.
    #[instrument(skip(self, submission), fields(model = %submission.model_name))]
    pub fn register_model(
        &self,
        submission: &ModelSubmission,
    ) -> Result<ModelRegistration, ModelSigError> {
        let body = to_body(submission)?;
        let raw = self.executor.execute(
            Method::Post,
            &format!("{}/models/register", API_PREFIX),
            Some(&body),
        )?;
        Ok(ModelRegistration::from_json(
            raw,
            &submission.model_name,
            &submission.version,
        ))
    }

    /// Policy enforcer sharing this client's executor.
    pub fn policy(&self, config: PolicyConfig) -> PolicyEnforcer {
        PolicyEnforcer::new(Arc::clone(&self.executor), config)
    }
}

/// Model ids are non-empty and limited to `[A-Za-z0-9_-]`.
fn validate_model_id(model_id: &str) -> Result<(), ModelSigError> {
    let well_formed = !model_id.is_empty()
        && model_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if well_formed {
        Ok(())
    } else {
        Err(ModelSigError::validation("Invalid model_id format"))
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn to_body<T: Serialize>(request: &T) -> Result<Value, ModelSigError> {
    serde_json::to_value(request).map_err(|e| ModelSigError::Api {
        message: format!("Failed to serialize request: {}", e),
    })
}
