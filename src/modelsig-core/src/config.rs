//! Configuration for the ModelSignature client.

use std::time::Duration;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.modelsignature.com";

/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "MODELSIGNATURE_API_KEY";

/// Environment variable overriding the base URL.
pub const ENV_BASE_URL: &str = "MODELSIGNATURE_BASE_URL";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the verification service (no trailing slash).
    pub base_url: String,
    /// API key sent as `X-API-Key`.
    pub api_key: Option<String>,
    /// Per-attempt socket timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Requests slower than this are logged as slow.
    pub slow_request_threshold: Duration,
    /// Retry schedule.
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
            user_agent: format!("modelsig-rust/{}", env!("CARGO_PKG_VERSION")),
            slow_request_threshold: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `MODELSIGNATURE_API_KEY` and `MODELSIGNATURE_BASE_URL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            if !key.trim().is_empty() {
                config.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                config = config.with_base_url(url.trim());
            }
        }
        config
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL. Trailing slashes are stripped.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Retry schedule for transient failures.
///
/// Attempt `n` (zero-based) that fails transiently sleeps
/// `backoff[min(n, len - 1)] * jitter` where jitter is drawn uniformly
/// from `[jitter_min, jitter_max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_retries: u32,
    /// Base delays, indexed by attempt number.
    pub backoff: Vec<Duration>,
    /// Lower bound of the jitter factor (inclusive).
    pub jitter_min: f64,
    /// Upper bound of the jitter factor (exclusive).
    pub jitter_max: f64,
    /// Longest `Retry-After` wait honoured before retrying a 429.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            jitter_min: 0.5,
            jitter_max: 1.5,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Same schedule with a different attempt count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Number of attempts actually made. Zero is treated as one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Base delay for an attempt, clamped to the last table entry.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self.backoff.last() {
            Some(last) => self
                .backoff
                .get(attempt as usize)
                .copied()
                .unwrap_or(*last),
            None => Duration::ZERO,
        }
    }

    /// Wait before retrying a 429, capped at `max_retry_after`.
    pub fn rate_limit_delay(&self, retry_after_secs: u64) -> Duration {
        Duration::from_secs(retry_after_secs).min(self.max_retry_after)
    }

    /// Base delay scaled by a jitter factor.
    pub fn jittered_delay(&self, attempt: u32, factor: f64) -> Duration {
        self.base_delay(attempt).mul_f64(factor.max(0.0))
    }
}
