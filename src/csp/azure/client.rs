//! HTTP plumbing shared by the Azure management and Graph calls
//!
//! Every request goes through [`AzureHttp::send`], which applies the rate
//! limiter, tags the request with a client request id and turns transport
//! failures into [`CspError::Connection`]. Non-success statuses are mapped
//! onto the provider taxonomy by [`classify`].

use log::{debug, warn};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::csp::error::{CspError, CspResult};
use crate::csp::resilience::{RateLimiter, RateLimiterStats};

const USER_AGENT: &str = "csp-provisioner/0.1";

/// A response that has been read to completion
#[derive(Debug, Clone)]
pub struct AzureResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl AzureResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// String field from the top level of the body
    pub fn field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(|v| v.as_str())
    }

    /// Message Azure put in the error envelope, or a status description
    pub fn error_message(&self) -> String {
        let envelope = self.body.get("error");
        envelope
            .and_then(|e| e.get("message"))
            .or_else(|| envelope.filter(|e| e.is_string()))
            .or_else(|| self.body.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with status {}", self.status))
    }

    /// Azure error code, e.g. `RoleAssignmentExists`
    pub fn error_code(&self) -> Option<&str> {
        self.body.get("error").and_then(|e| e.get("code")).and_then(|c| c.as_str())
    }
}

#[derive(Clone)]
pub struct AzureHttp {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter,
}

impl AzureHttp {
    pub fn new(http_client: reqwest::Client, rate_limiter: RateLimiter) -> Self {
        Self { http_client, rate_limiter }
    }

    /// Pooled client with the same connection settings for both APIs
    pub fn build_client(request_timeout: Duration) -> CspResult<reqwest::Client> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CspError::general(format!("failed to build HTTP client: {}", e)))
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.rate_limiter.stats()
    }

    pub async fn send(&self, request: RequestBuilder, token: &str) -> CspResult<AzureResponse> {
        let waited = self.rate_limiter.acquire().await;
        if !waited.is_zero() {
            debug!("Azure request held back {:?} by rate limiter", waited);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let response = request
            .bearer_auth(token)
            .header("x-ms-client-request-id", &request_id)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!("Azure request {} returned {}", request_id, status);

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Azure throttled request {}", request_id);
        }

        Ok(AzureResponse { status, body })
    }
}

/// Map a non-success response onto the taxonomy
///
/// `permanent` builds the operation's own failure for client errors that are
/// not covered by a shared variant. `409` maps to `OperationInProgress`;
/// callers with a more specific meaning for it check before calling this.
pub fn classify(response: &AzureResponse, permanent: impl FnOnce(String) -> CspError) -> CspError {
    let message = response.error_message();
    match response.status {
        StatusCode::UNAUTHORIZED => CspError::authentication(message),
        StatusCode::FORBIDDEN => CspError::authorization(message),
        StatusCode::REQUEST_TIMEOUT => CspError::connection(message),
        StatusCode::CONFLICT => CspError::operation_in_progress(message),
        StatusCode::TOO_MANY_REQUESTS => CspError::unknown_server(format!("throttled: {}", message)),
        status if status.is_server_error() => CspError::unknown_server(message),
        _ => permanent(message),
    }
}
