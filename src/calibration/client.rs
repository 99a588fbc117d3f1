//! Retrying HTTP client for the remote calibration model.
//!
//! The transport is a trait so tests (and alternate deployments) can swap
//! the HTTP implementation for a fake. Retry policy lives above the
//! transport: up to a configured number of attempts, a fixed backoff
//! schedule, and retries only for transient failures (timeouts, connection
//! errors, 5xx). Client errors and malformed responses fail immediately.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CalibrationConfig;

/// Leading window of a response checked for refusal phrases.
const REFUSAL_PREFIX_WINDOW: usize = 100;

/// Phrases that mark a content-policy refusal when they appear in the
/// leading window of a response (case-insensitive).
const REFUSAL_PHRASES: &[&str] = &[
    "i cannot",
    "i can't",
    "i'm not able to",
    "i am not able to",
    "i apologize, but",
    "i'm sorry, but",
    "as an ai",
];

/// Errors raised by a single transport attempt or by the retrying client
/// after its budget is exhausted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request timed out.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The server answered with a 5xx status.
    #[error("Server error ({code}): {message}")]
    Server { code: u16, message: String },

    /// The server answered with a 4xx status.
    #[error("Client error ({code}): {message}")]
    Client { code: u16, message: String },

    /// The response body was not the expected JSON shape.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether this failure is worth retrying.
    ///
    /// Timeouts, connection failures, and server errors are transient;
    /// client errors and malformed bodies will not improve on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_)
                | TransportError::Connection(_)
                | TransportError::Server { .. }
        )
    }
}

/// Generation payload posted to the remote model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    /// The full, wrapper-framed prompt text.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_new_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Whether the model should sample.
    pub do_sample: bool,
}

impl ModelRequest {
    /// Builds a request from the configured generation parameters.
    pub fn from_config(prompt: impl Into<String>, config: &CalibrationConfig) -> Self {
        Self {
            prompt: prompt.into(),
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            do_sample: config.do_sample,
        }
    }
}

/// Expected response body from the remote model.
#[derive(Debug, Deserialize)]
struct ModelResponse {
    response: String,
}

/// A successful reply, with the number of retries the call needed.
#[derive(Debug, Clone)]
pub struct ModelReply {
    /// The raw response text.
    pub text: String,
    /// Transport retries consumed before this reply (0 = first attempt).
    pub retries: u32,
}

/// One-shot transport to the remote model; no retry logic.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Sends a single request and returns the raw response text.
    async fn send(&self, request: &ModelRequest) -> Result<String, TransportError>;
}

/// HTTP transport posting JSON to the configured endpoint.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    /// Creates a transport with separate connect and request timeouts.
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(connect_timeout)
                .timeout(request_timeout)
                .build()
                .expect("Failed to build HTTP client - system TLS configuration error"),
            endpoint: endpoint.into(),
        }
    }

    /// Creates a transport from calibration configuration.
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.connect_timeout,
            config.request_timeout,
        )
    }

    /// Returns the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn send(&self, request: &ModelRequest) -> Result<String, TransportError> {
        let http_response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(e.to_string())
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        let status = http_response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let message = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            if code >= 500 {
                return Err(TransportError::Server { code, message });
            }
            return Err(TransportError::Client { code, message });
        }

        let body: ModelResponse = http_response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        Ok(body.response)
    }
}

/// Retrying client over a transport.
///
/// Makes up to `max_attempts` calls, sleeping through the fixed backoff
/// schedule between attempts, and retrying only transient failures.
pub struct ModelClient<T: ModelTransport> {
    transport: T,
    max_attempts: u32,
    retry_delays: Vec<Duration>,
}

impl<T: ModelTransport> ModelClient<T> {
    /// Creates a client with the given transport and retry policy.
    pub fn new(transport: T, max_attempts: u32, retry_delays: Vec<Duration>) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
            retry_delays,
        }
    }

    /// Creates a client from calibration configuration.
    pub fn from_config(transport: T, config: &CalibrationConfig) -> Self {
        Self::new(transport, config.max_attempts, config.retry_delays.clone())
    }

    /// Sends a request, retrying transient failures with fixed backoff.
    ///
    /// Returns the reply together with the number of retries it took, or
    /// the last error once the attempt budget is exhausted.
    pub async fn send(&self, request: &ModelRequest) -> Result<ModelReply, TransportError> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt - 1);
                debug!(
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    "Retrying remote call after transient failure"
                );
                tokio::time::sleep(delay).await;
            }

            match self.transport.send(request).await {
                Ok(text) => {
                    return Ok(ModelReply {
                        text,
                        retries: attempt,
                    })
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient transport failure"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::Connection("Attempt budget exhausted with no error captured".to_string())
        }))
    }

    fn backoff_delay(&self, index: u32) -> Duration {
        self.retry_delays
            .get(index as usize)
            .copied()
            .or_else(|| self.retry_delays.last().copied())
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Checks whether a response is a content-policy refusal.
///
/// Only a short prefix of the text is examined; refusals open with an
/// apology or a denial, so a phrase deep in an otherwise substantive
/// response does not count.
pub fn is_refusal(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let window: String = text
        .chars()
        .take(REFUSAL_PREFIX_WINDOW)
        .collect::<String>()
        .to_lowercase();
    REFUSAL_PHRASES.iter().any(|phrase| window.contains(phrase))
}
