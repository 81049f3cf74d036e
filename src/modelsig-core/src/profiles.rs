//! Preset policy profiles.
//!
//! | Profile | fail_closed | deployment id | model digest | max age |
//! |---------|-------------|---------------|--------------|---------|
//! | secure  | yes         | required      | required     | 300s    |
//! | lenient | no          | -             | -            | 3600s   |
//!
//! Neither preset requires bundle verification or sets allow-lists.
//! [`PolicyOverrides`] replaces individual fields of a preset.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::client::ModelSignatureClient;
use crate::policy::{PolicyConfig, PolicyEnforcer};

/// Field-by-field replacements for a preset. `None` keeps the preset value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyOverrides {
    /// Replaces `require_deployment_id`.
    pub require_deployment_id: Option<bool>,
    /// Replaces `require_model_digest`.
    pub require_model_digest: Option<bool>,
    /// Replaces `require_bundle_verification`.
    pub require_bundle_verification: Option<bool>,
    /// Replaces `allowed_providers`.
    pub allowed_providers: Option<BTreeSet<String>>,
    /// Replaces `allowed_models`.
    pub allowed_models: Option<BTreeSet<String>>,
    /// Replaces `max_token_age`. `Some(None)` disables the age check.
    pub max_token_age: Option<Option<Duration>>,
    /// Replaces `fail_closed`.
    pub fail_closed: Option<bool>,
}

impl PolicyOverrides {
    /// Apply the supplied fields on top of `base`.
    pub fn apply(self, base: PolicyConfig) -> PolicyConfig {
        PolicyConfig {
            require_deployment_id: self
                .require_deployment_id
                .unwrap_or(base.require_deployment_id),
            require_model_digest: self
                .require_model_digest
                .unwrap_or(base.require_model_digest),
            require_bundle_verification: self
                .require_bundle_verification
                .unwrap_or(base.require_bundle_verification),
            allowed_providers: self.allowed_providers.unwrap_or(base.allowed_providers),
            allowed_models: self.allowed_models.unwrap_or(base.allowed_models),
            max_token_age: self.max_token_age.unwrap_or(base.max_token_age),
            fail_closed: self.fail_closed.unwrap_or(base.fail_closed),
        }
    }
}

/// Strict production preset.
pub fn secure_config() -> PolicyConfig {
    PolicyConfig {
        require_deployment_id: true,
        require_model_digest: true,
        require_bundle_verification: false,
        allowed_providers: BTreeSet::new(),
        allowed_models: BTreeSet::new(),
        max_token_age: Some(Duration::from_secs(300)),
        fail_closed: true,
    }
}

/// Permissive development preset.
pub fn lenient_config() -> PolicyConfig {
    PolicyConfig {
        require_deployment_id: false,
        require_model_digest: false,
        require_bundle_verification: false,
        allowed_providers: BTreeSet::new(),
        allowed_models: BTreeSet::new(),
        max_token_age: Some(Duration::from_secs(3600)),
        fail_closed: false,
    }
}

/// Enforcer using [`secure_config`] with `overrides` applied.
pub fn secure_policy(client: &ModelSignatureClient, overrides: PolicyOverrides) -> PolicyEnforcer {
    client.policy(overrides.apply(secure_config()))
}

/// Enforcer using [`lenient_config`] with `overrides` applied.
pub fn lenient_policy(client: &ModelSignatureClient, overrides: PolicyOverrides) -> PolicyEnforcer {
    client.policy(overrides.apply(lenient_config()))
}
