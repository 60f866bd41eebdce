//! Directory-service collaborator — the external account provider.
//!
//! The provisioner only ever sees this narrow contract: an existence
//! check and a create call. Error classification (transient vs
//! permanent) lives with the adapter, retry policy with the provisioner.

pub mod rest;

pub use rest::{DirectoryConfig, RestDirectory};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::ProviderError;
use crate::pipeline::types::AccountRequest;

/// Narrow contract over the external directory provider.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Whether an account with this primary address already exists.
    async fn user_exists(&self, primary_address: &str) -> Result<bool, ProviderError>;

    /// Create the account.
    ///
    /// `force_password_change` makes the temporary credential single-use:
    /// the holder must replace it at first login.
    async fn create_user(
        &self,
        request: &AccountRequest,
        primary_address: &str,
        credential: &SecretString,
        org_unit: &str,
        force_password_change: bool,
    ) -> Result<(), ProviderError>;
}
