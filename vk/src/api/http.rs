//! HTTP transport for the VK API
//!
//! One GET per call: `{base_url}/method/{method}?{params}&v={version}&access_token={token}`.
//! The backend answers `{"response": ...}` on success and
//! `{"error": {"error_code": N, "error_msg": "..."}}` on failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{ApiError, Token, Transport};
use crate::config::ApiConfig;
use crate::domain::Params;

/// Error object returned by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// Top-level response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

/// reqwest-backed transport
pub struct HttpTransport {
    http: Client,
    base_url: String,
    version: String,
    debug: bool,
}

impl HttpTransport {
    /// Create a new transport from API configuration
    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        debug!(base_url = %config.base_url, version = %config.version, "HttpTransport::from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            version: config.version.clone(),
            debug: config.debug,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/method/{}", self.base_url, method)
    }

    /// Query pairs for one call; an explicit `v` param overrides the configured version
    fn query(&self, params: &Params, token: Option<&Token>) -> Vec<(String, String)> {
        let mut query = params.to_query();
        if !params.contains("v") {
            query.push(("v".to_string(), self.version.clone()));
        }
        if let Some(token) = token {
            query.push(("access_token".to_string(), token.expose().to_string()));
        }
        query
    }
}

/// Unwrap the response envelope
fn decode(body: &str) -> Result<Value, ApiError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    if let Some(error) = envelope.error {
        return Err(ApiError::Api {
            code: error.error_code,
            message: error.error_msg,
        });
    }
    envelope
        .response
        .ok_or_else(|| ApiError::InvalidResponse("response has neither 'response' nor 'error'".to_string()))
}

/// Request URL with the access token masked, for logging
fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "access_token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, method: &str, params: &Params, token: Option<&Token>) -> Result<Value, ApiError> {
        debug!(%method, param_count = params.len(), "HttpTransport::send: called");
        let request = self
            .http
            .get(self.method_url(method))
            .query(&self.query(params, token))
            .build()?;

        if self.debug {
            info!(url = %redact(request.url()), "request");
        }

        let response = self.http.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if self.debug {
            info!(%method, %status, %body, "response");
        }

        if !status.is_success() {
            debug!(%status, "HttpTransport::send: non-success status");
            return Err(ApiError::InvalidResponse(format!("HTTP {}", status)));
        }

        decode(&body)
    }
}
