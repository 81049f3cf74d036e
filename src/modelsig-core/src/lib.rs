//! # modelsig-core
//!
//! Blocking client for the ModelSignature verification service: issue
//! verification tokens, inspect them locally, and enforce deployment
//! policies against the service's verdict.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ModelSignatureClient                        │
//! │                                                              │
//! │  ┌───────────────────┐          ┌──────────────────────┐    │
//! │  │ VerificationCache │          │   PolicyEnforcer     │    │
//! │  │ (per-key slots)   │          │ (secure / lenient)   │    │
//! │  └───────────────────┘          └──────────────────────┘    │
//! │            │                         │            │          │
//! │            ▼                         ▼            ▼          │
//! │  ┌──────────────────────────────────────┐  ┌────────────┐   │
//! │  │           RequestExecutor            │  │   Token    │   │
//! │  │  (auth headers, retry, jitter, 429)  │  │ Inspector  │   │
//! │  └──────────────────────────────────────┘  │  (local)   │   │
//! │                     │                      └────────────┘   │
//! │                     ▼                                        │
//! │  ┌──────────────────────────────────────┐                   │
//! │  │        Transport (ureq, blocking)    │                   │
//! │  └──────────────────────────────────────┘                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Properties
//!
//! - **Service is authoritative**: local token inspection never checks
//!   signatures and is only used for format and age hints
//! - **Fail-closed by default**: policy violations become errors unless
//!   the enforcer is configured fail-open
//! - **Bounded retries**: at most `max_retries` attempts per request
//!
//! ## Example
//!
//! ```no_run
//! use modelsig_core::{profiles, ClientConfig, ModelSignatureClient, PolicyOverrides};
//!
//! let client = ModelSignatureClient::new(ClientConfig::from_env());
//! let issued = client.create_verification("my-model", "user-123", None)?;
//!
//! let policy = profiles::secure_policy(&client, PolicyOverrides::default());
//! let result = policy.enforce(&issued.token)?;
//! assert!(result.allowed());
//! # Ok::<(), modelsig_core::ModelSigError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod jwt;
pub mod policy;
pub mod profiles;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use cache::{CacheKey, VerificationCache};
pub use client::{ModelSignatureClient, ModelSubmission, ProviderSignup};
pub use config::{ClientConfig, RetryPolicy};
pub use error::{ModelSigError, TransportError};
pub use executor::{CancellationToken, RequestExecutor, Sleeper, ThreadSleeper};
pub use jwt::{hash_response, ExpiryStatus, TokenInspector};
pub use policy::{check_rules, PolicyConfig, PolicyEnforcer, QuickCheck};
pub use profiles::{lenient_config, secure_config, PolicyOverrides};
pub use transport::{HttpRequest, HttpResponse, Method, Transport, UreqTransport};
pub use types::{
    BundleCheck, JwtClaims, ModelInfo, ModelRegistration, PolicyResult, ProviderInfo,
    ProviderRegistration, VerificationResponse, VerificationResult,
};
