//! Request execution with status classification and retries.
//!
//! Every call goes through [`RequestExecutor::execute`], which:
//!
//! 1. Tags the attempt with a fresh `X-Request-ID`
//! 2. Sends it through the configured [`Transport`]
//! 3. Classifies the status code into a [`ModelSigError`] or a JSON body
//! 4. Sleeps on the jittered backoff schedule and retries transient failures
//!
//! ## Classification
//!
//! | Status | Result |
//! |---|---|
//! | 401, 403 | `Authentication`, not retried |
//! | 400, 404, 422 | `Validation`, not retried |
//! | 429 | waits `Retry-After` (capped by `max_retry_after`), then `RateLimit` once attempts run out |
//! | 502, 503, 504, other 5xx | `Network`, retried |
//! | 2xx | JSON body, or `Api` if it does not parse |
//! | anything else | `Api`, retried |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, RetryPolicy};
use crate::error::ModelSigError;
use crate::transport::{HttpRequest, HttpResponse, Method, Transport, UreqTransport};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Header carrying the per-attempt correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Blocks the current thread between retry attempts.
pub trait Sleeper: Send + Sync {
    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] that calls `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Cooperative cancellation flag for retry loops.
///
/// Checked before each attempt and before each backoff sleep. An attempt
/// already on the wire runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What to do with a response.
enum Classified {
    Success(Value),
    Fatal(ModelSigError),
    RateLimited(u64),
    Retry(ModelSigError),
}

/// Issues API calls with retries and error classification.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    base_url: String,
    api_key: Option<String>,
    user_agent: String,
    slow_request_threshold: Duration,
    retry: RetryPolicy,
}

impl RequestExecutor {
    /// Create an executor using the blocking HTTP transport.
    pub fn new(config: &ClientConfig) -> Self {
        let transport = UreqTransport::new(config.timeout, &config.user_agent);
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create an executor over a custom transport.
    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(ThreadSleeper),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            user_agent: config.user_agent.clone(),
            slow_request_threshold: config.slow_request_threshold,
            retry: config.retry.clone(),
        }
    }

    /// Replace the sleeper used between attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The retry schedule in effect.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a request and return the parsed JSON body.
    pub fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ModelSigError> {
        self.execute_cancellable(method, path, body, None)
    }

    /// Execute a request, stopping between attempts if `cancel` fires.
    #[instrument(skip_all, fields(method = %method, path = %redact_path(path)))]
    pub fn execute_cancellable(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, ModelSigError> {
        let url = self.url_for(path);
        let body_text = body
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ModelSigError::Api {
                message: format!("Failed to serialize request body: {}", e),
            })?;

        let attempts = self.retry.attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            check_cancelled(cancel)?;

            let request_id = Uuid::new_v4().to_string();
            let request = self.build_request(method, &url, body_text.clone(), &request_id);

            let started = Instant::now();
            let outcome = self.transport.send(&request);
            let elapsed = started.elapsed();

            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    debug!(request_id = %request_id, attempt, error = %e, "Request failed before a response");
                    self.backoff(attempt, cancel)?;
                    last_error = Some(ModelSigError::from(e));
                    continue;
                },
            };

            let duration_ms = elapsed.as_millis() as u64;
            debug!(
                request_id = %request_id,
                attempt,
                status = response.status,
                duration_ms,
                "Response received"
            );
            if elapsed > self.slow_request_threshold {
                warn!(request_id = %request_id, duration_ms, "Slow request");
            }

            match classify(&response) {
                Classified::Success(value) => return Ok(value),
                Classified::Fatal(err) => return Err(err),
                Classified::RateLimited(retry_after) => {
                    if attempt + 1 >= attempts {
                        return Err(ModelSigError::RateLimit { retry_after });
                    }
                    let delay = self.retry.rate_limit_delay(retry_after);
                    warn!(
                        request_id = %request_id,
                        retry_after,
                        wait_ms = delay.as_millis() as u64,
                        "Rate limited"
                    );
                    self.pause(delay, cancel)?;
                },
                Classified::Retry(err) => {
                    debug!(request_id = %request_id, attempt, error = %err, "Retryable failure");
                    self.backoff(attempt, cancel)?;
                    last_error = Some(err);
                },
            }
        }

        Err(last_error.unwrap_or_else(|| ModelSigError::Api {
            message: "Request failed".into(),
        }))
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
        request_id: &str,
    ) -> HttpRequest {
        let mut headers = vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            (REQUEST_ID_HEADER.to_string(), request_id.to_string()),
        ];
        if let Some(ref key) = self.api_key {
            headers.push((API_KEY_HEADER.to_string(), key.clone()));
        }
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        HttpRequest {
            method,
            url: url.to_string(),
            headers,
            body,
        }
    }

    fn backoff(&self, attempt: u32, cancel: Option<&CancellationToken>) -> Result<(), ModelSigError> {
        let factor = jitter_factor(self.retry.jitter_min, self.retry.jitter_max);
        let delay = self.retry.jittered_delay(attempt, factor);
        self.pause(delay, cancel)
    }

    fn pause(&self, delay: Duration, cancel: Option<&CancellationToken>) -> Result<(), ModelSigError> {
        check_cancelled(cancel)?;
        if !delay.is_zero() {
            self.sleeper.sleep(delay);
        }
        Ok(())
    }
}

fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<(), ModelSigError> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(ModelSigError::Cancelled),
        _ => Ok(()),
    }
}

fn jitter_factor(min: f64, max: f64) -> f64 {
    if max > min {
        rand::thread_rng().gen_range(min..max)
    } else {
        min
    }
}

fn classify(response: &HttpResponse) -> Classified {
    match response.status {
        401 | 403 => Classified::Fatal(ModelSigError::Authentication {
            message: error_detail(&response.body),
        }),
        400 => Classified::Fatal(ModelSigError::Validation {
            message: format!("Bad request: {}", error_detail(&response.body)),
        }),
        404 => Classified::Fatal(ModelSigError::Validation {
            message: "Resource not found. Check the model or token identifier".into(),
        }),
        422 => Classified::Fatal(ModelSigError::Validation {
            message: format!("Invalid parameters: {}", validation_detail(&response.body)),
        }),
        429 => Classified::RateLimited(
            response
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(1),
        ),
        502..=504 => Classified::Retry(ModelSigError::Network {
            message: format!(
                "ModelSignature API is temporarily unavailable (HTTP {})",
                response.status
            ),
        }),
        status if status >= 500 => Classified::Retry(ModelSigError::Network {
            message: format!("Server error {}: {}", status, error_detail(&response.body)),
        }),
        200..=299 => match serde_json::from_str::<Value>(&response.body) {
            Ok(value) => Classified::Success(value),
            Err(e) => Classified::Fatal(ModelSigError::Api {
                message: format!("Invalid JSON response: {}", e),
            }),
        },
        status => Classified::Retry(ModelSigError::Api {
            message: format!("API error {}: {}", status, response.body),
        }),
    }
}

/// `detail` field of a JSON error body, or the raw body.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ => body.to_string(),
    }
}

/// Flatten a 422 body: `errors` or `detail`, joining list items' `msg`.
fn validation_detail(body: &str) -> String {
    let parsed = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(_) => return body.to_string(),
    };
    let map = match parsed {
        Value::Object(map) => map,
        other => return other.to_string(),
    };

    let errors = map
        .get("errors")
        .filter(|v| is_present(v))
        .or_else(|| map.get("detail"));

    match errors {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                _ => item
                    .get("msg")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| item.to_string()),
            })
            .collect::<Vec<_>>()
            .join("; "),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => body.to_string(),
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Shorten JWT-shaped path segments so tokens never reach the logs.
pub(crate) fn redact_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.len() > 16 && segment.contains('.') {
                format!("{}...", segment.chars().take(8).collect::<String>())
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
