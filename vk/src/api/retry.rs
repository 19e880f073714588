//! Bounded retry around a single transport

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, Token, Transport};
use crate::domain::Params;

/// Default number of attempts per call
pub const DEFAULT_MAX_RETRIES: u32 = 7;

/// Default pause before retrying a transient backend error
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Internal error, too many requests per second, flood control and friends
pub const DEFAULT_TRANSIENT_CODES: [i64; 5] = [1, 6, 9, 10, 29];

/// Retry policy applied to every outbound call
///
/// Transport-level failures are retried right away; backend errors with a
/// transient code are retried after `delay`; any other backend error is
/// returned on the spot. When attempts run out the last error is returned.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub delay: Duration,
    pub transient_codes: Vec<i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            transient_codes: DEFAULT_TRANSIENT_CODES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Execute one logical call through `transport`
    pub async fn request(
        &self,
        transport: &dyn Transport,
        method: &str,
        params: &Params,
        token: Option<&Token>,
    ) -> Result<Value, ApiError> {
        debug!(%method, max_retries = self.max_retries, "RetryPolicy::request: called");
        let attempts = self.max_retries.max(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            match transport.send(method, params, token).await {
                Ok(value) => {
                    debug!(%method, attempt, "RetryPolicy::request: success");
                    return Ok(value);
                }
                Err(e) if e.is_transport() => {
                    debug!(%method, attempt, error = %e, "RetryPolicy::request: transport error");
                    last_error = Some(e);
                }
                Err(e) if e.is_transient(&self.transient_codes) && attempt < attempts => {
                    warn!(
                        %method,
                        attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    debug!(%method, attempt, error = %e, "RetryPolicy::request: not retryable");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ApiError::InvalidResponse("Max retries exceeded".to_string())))
    }
}
