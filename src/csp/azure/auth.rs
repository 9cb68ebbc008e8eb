use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use super::constants;
use crate::csp::error::{CspError, CspResult};
use crate::csp::models::AuthCredentials;

/// Token refreshed this long before its stated expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct TokenInfo {
    access_token: String,
    expires_at: SystemTime,
}

/// Client-credentials token acquisition against Azure AD
///
/// Tokens are cached per (tenant, client, resource) but credentials are
/// validated on every lookup, so a changed secret never reuses a token.
pub struct TokenProvider {
    http_client: reqwest::Client,
    authority_url: String,
    tokens: Mutex<HashMap<(String, String, String), (AuthCredentials, TokenInfo)>>,
}

impl TokenProvider {
    pub fn new(http_client: reqwest::Client, authority_url: impl Into<String>) -> Self {
        Self {
            http_client,
            authority_url: authority_url.into(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn token(&self, credentials: &AuthCredentials, resource: &str) -> CspResult<String> {
        let tenant_id = credentials.require("tenant_id")?;
        let client_id = credentials.require("client_id")?;
        let secret_key = credentials.require("secret_key")?;

        let key = (tenant_id.to_string(), client_id.to_string(), resource.to_string());
        if let Some(token) = self.cached(&key, credentials) {
            return Ok(token);
        }

        info!("Requesting token for client {} on {}", client_id, resource);
        let response = self
            .http_client
            .post(constants::token_endpoint(&self.authority_url, tenant_id))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", secret_key),
                ("resource", resource),
            ])
            .send()
            .await?;

        let status = response.status();
        debug!("Token request status: {}", status);
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_server_error() {
            return Err(CspError::unknown_server(format!("token endpoint returned {}", status)));
        }
        if !status.is_success() {
            let reason = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("token request rejected");
            return Err(CspError::authentication(reason.to_string()));
        }

        let access_token = body
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| CspError::authentication("No access token in response"))?
            .to_string();

        // Azure AD v1 sends expires_in as a string
        let expires_in = body
            .get("expires_in")
            .and_then(|e| e.as_u64().or_else(|| e.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(3600);

        let token = TokenInfo {
            access_token: access_token.clone(),
            expires_at: SystemTime::now() + Duration::from_secs(expires_in),
        };
        self.tokens().insert(key, (credentials.clone(), token));

        Ok(access_token)
    }

    fn cached(&self, key: &(String, String, String), credentials: &AuthCredentials) -> Option<String> {
        let tokens = self.tokens();
        let (cached_for, token) = tokens.get(key)?;
        let fresh = token
            .expires_at
            .duration_since(SystemTime::now())
            .is_ok_and(|left| left > EXPIRY_MARGIN);
        (fresh && cached_for == credentials).then(|| token.access_token.clone())
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<(String, String, String), (AuthCredentials, TokenInfo)>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
