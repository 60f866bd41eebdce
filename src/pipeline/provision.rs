//! Account provisioner — duplicate check, credential generation, and
//! creation with bounded retry for transient provider errors.
//!
//! `provision` never returns an error: every outcome folds into a
//! [`ProvisioningResult`] the poller can record and dispatch on. The
//! `create_user` call happens at most once per request — the existence
//! check and the provider's own duplicate signal both short-circuit to
//! `AlreadyExists` without creating anything.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::credential;
use crate::directory::Directory;
use crate::error::ProviderError;
use crate::pipeline::types::{AccountRequest, ProvisioningResult, ProvisioningStatus};

/// Drives the external directory service for allowed requests.
pub struct AccountProvisioner {
    directory: Arc<dyn Directory>,
    domain: String,
    org_unit: String,
    max_attempts: u32,
    backoff_base: Duration,
}

impl AccountProvisioner {
    pub fn new(directory: Arc<dyn Directory>, config: &AppConfig) -> Self {
        Self {
            directory,
            domain: config.domain.clone(),
            org_unit: config.org_unit.clone(),
            max_attempts: config.provider_max_attempts.max(1),
            backoff_base: config.provider_backoff,
        }
    }

    /// The primary address a username maps to under this configuration.
    pub fn primary_address(&self, username: &str) -> String {
        format!("{username}@{}", self.domain)
    }

    /// Provision the account for an allowed request.
    pub async fn provision(&self, request: &AccountRequest) -> ProvisioningResult {
        let primary_address = self.primary_address(&request.username);

        match self
            .with_retry("user_exists", || {
                self.directory.user_exists(&primary_address)
            })
            .await
        {
            Ok(true) => {
                info!(primary_address, "Account already exists; nothing to create");
                return ProvisioningResult {
                    primary_address,
                    temporary_credential: None,
                    status: ProvisioningStatus::AlreadyExists,
                    provider_detail: None,
                };
            }
            Ok(false) => {}
            Err(e) => return failed(primary_address, &e),
        }

        let temporary_credential = credential::generate();

        match self
            .with_retry("create_user", || {
                self.directory.create_user(
                    request,
                    &primary_address,
                    &temporary_credential,
                    &self.org_unit,
                    true,
                )
            })
            .await
        {
            Ok(()) => {
                info!(primary_address, "Account provisioned");
                ProvisioningResult {
                    primary_address,
                    temporary_credential: Some(temporary_credential),
                    status: ProvisioningStatus::Created,
                    provider_detail: None,
                }
            }
            // A concurrent run won the race between our existence check
            // and the create call. Same short-circuit as above.
            Err(ProviderError::Duplicate { .. }) => {
                info!(primary_address, "Create reported duplicate; treating as existing");
                ProvisioningResult {
                    primary_address,
                    temporary_credential: None,
                    status: ProvisioningStatus::AlreadyExists,
                    provider_detail: None,
                }
            }
            Err(e) => failed(primary_address, &e),
        }
    }

    /// Run a provider call, retrying transient failures up to the bound
    /// with exponential backoff. Exhausted transients demote to permanent.
    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.backoff_base * 2u32.pow(attempt - 1));
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(ProviderError::Transient { reason, .. }) => {
                    return Err(ProviderError::Permanent {
                        reason: format!("{reason} (gave up after {attempt} attempts)"),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn failed(primary_address: String, error: &ProviderError) -> ProvisioningResult {
    warn!(primary_address, error = %error, "Provisioning failed");
    ProvisioningResult {
        primary_address,
        temporary_credential: None,
        status: ProvisioningStatus::Failed,
        provider_detail: Some(error.to_string()),
    }
}
