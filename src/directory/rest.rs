//! REST directory adapter — JSON admin API client.
//!
//! Speaks a Google-Directory-shaped user API: `GET /users/{address}` for
//! the existence check, `POST /users` for creation. Every response maps
//! into the transient/permanent provider-error taxonomy the provisioner's
//! retry policy runs on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::config::{parse_env, require_env};
use crate::directory::Directory;
use crate::error::{ConfigError, ProviderError};
use crate::pipeline::types::AccountRequest;

// ── Configuration ───────────────────────────────────────────────────

/// Directory API configuration, built from environment variables.
#[derive(Debug)]
pub struct DirectoryConfig {
    /// Base URL, e.g. `https://directory.internal/api/v1`.
    pub base_url: String,
    pub api_token: SecretString,
    pub timeout: Duration,
}

impl DirectoryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: require_env("DIRECTORY_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            api_token: SecretString::from(require_env("DIRECTORY_API_TOKEN")?),
            timeout: Duration::from_secs(parse_env("DIRECTORY_TIMEOUT_SECS", 30)?),
        })
    }
}

// ── Adapter ─────────────────────────────────────────────────────────

/// REST-backed [`Directory`].
pub struct RestDirectory {
    config: Arc<DirectoryConfig>,
    client: reqwest::Client,
}

impl RestDirectory {
    pub fn new(config: DirectoryConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "DIRECTORY_TIMEOUT_SECS".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }
}

#[async_trait]
impl Directory for RestDirectory {
    async fn user_exists(&self, primary_address: &str) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/users/{primary_address}")))
            .bearer_auth(self.config.api_token.expose_secret())
            .send()
            .await
            .map_err(classify_request_error)?;

        match response.status() {
            StatusCode::OK => {
                debug!(primary_address, "User exists");
                Ok(true)
            }
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let retry_after = retry_after(&response);
                let body = response.text().await.unwrap_or_default();
                Err(classify_status(status, &body, retry_after))
            }
        }
    }

    async fn create_user(
        &self,
        request: &AccountRequest,
        primary_address: &str,
        credential: &SecretString,
        org_unit: &str,
        force_password_change: bool,
    ) -> Result<(), ProviderError> {
        let payload = user_payload(
            request,
            primary_address,
            credential,
            org_unit,
            force_password_change,
        );

        let response = self
            .client
            .post(self.url("/users"))
            .bearer_auth(self.config.api_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(classify_request_error)?;

        match response.status() {
            status if status.is_success() => {
                info!(primary_address, "Directory user created");
                Ok(())
            }
            StatusCode::CONFLICT => Err(ProviderError::Duplicate {
                primary_address: primary_address.to_string(),
            }),
            status => {
                let retry_after = retry_after(&response);
                let body = response.text().await.unwrap_or_default();
                Err(classify_status(status, &body, retry_after))
            }
        }
    }
}

// ── Classification & payload (public for testing) ───────────────────

/// Build the create-user body. The credential appears here and nowhere
/// else on our side of the wire.
pub fn user_payload(
    request: &AccountRequest,
    primary_address: &str,
    credential: &SecretString,
    org_unit: &str,
    force_password_change: bool,
) -> serde_json::Value {
    serde_json::json!({
        "name": {
            "givenName": request.first_name,
            "familyName": request.last_name,
        },
        "primaryEmail": primary_address,
        "password": credential.expose_secret(),
        "orgUnitPath": org_unit,
        "changePasswordAtNextLogin": force_password_change,
        "suspended": false,
        "organizations": [{
            "department": request.department,
            "title": request.title,
            "primary": true,
        }],
    })
}

/// Map an HTTP status to the provider-error taxonomy: 429 and 5xx are
/// transient, everything else permanent.
pub fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> ProviderError {
    let reason = if body.is_empty() {
        format!("directory returned {status}")
    } else {
        format!("directory returned {status}: {body}")
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient {
            reason,
            retry_after,
        }
    } else {
        ProviderError::Permanent { reason }
    }
}

/// Map a reqwest transport error: timeouts and connection failures are
/// transient, anything else (bad request construction etc.) permanent.
pub fn classify_request_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() || error.is_connect() {
        ProviderError::Transient {
            reason: error.to_string(),
            retry_after: None,
        }
    } else {
        ProviderError::Permanent {
            reason: error.to_string(),
        }
    }
}

/// Parse a `Retry-After: <seconds>` header, if the provider sent one.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
