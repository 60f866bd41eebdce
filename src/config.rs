//! Immutable service configuration, built once from the environment.
//!
//! The core never reads environment variables at runtime — `main` builds
//! an [`AppConfig`] once, validates it, and passes it (or pieces of it)
//! into the pipeline explicitly.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::authorize::AllowList;

/// Core service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Organization domain new accounts are created under (e.g. "org.example").
    pub domain: String,
    /// Senders permitted to request account creation.
    pub allow_list: AllowList,
    /// Administrator address for alerts and audit copies.
    pub admin_address: String,
    /// Directory org unit path new accounts land in.
    pub org_unit: String,
    /// Maximum attempts per directory call (first try included).
    pub provider_max_attempts: u32,
    /// Base delay for exponential backoff between retries.
    pub provider_backoff: Duration,
    /// Hard ceiling on one full poll cycle.
    pub run_timeout: Duration,
    /// Port the trigger server listens on.
    pub http_port: u16,
    /// Path of the processing-ledger database file.
    pub ledger_path: String,
}

impl AppConfig {
    /// Build and validate the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let domain = require_env("DOMAIN")?;
        let admin_address = require_env("ADMIN_ADDRESS")?;

        let allow_list = AllowList::new(require_env("AUTHORIZED_SENDERS")?.split(','));
        if allow_list.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "AUTHORIZED_SENDERS".into(),
                message: "at least one authorized sender address is required".into(),
            });
        }

        Ok(Self {
            domain,
            allow_list,
            admin_address,
            org_unit: env_or("DEFAULT_ORG_UNIT", "/"),
            provider_max_attempts: parse_env("PROVIDER_MAX_ATTEMPTS", 3)?,
            provider_backoff: Duration::from_millis(parse_env("PROVIDER_BACKOFF_MS", 500)?),
            run_timeout: Duration::from_secs(parse_env("RUN_TIMEOUT_SECS", 300)?),
            http_port: parse_env("HTTP_PORT", 8080)?,
            ledger_path: env_or("LEDGER_DB_PATH", "./data/ledger.db"),
        })
    }
}

// ── Env helpers (shared with the adapter configs) ───────────────────

/// Read a required environment variable; blank counts as missing.
pub(crate) fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Read an optional environment variable with a default.
pub(crate) fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Read and parse an optional environment variable with a default.
pub(crate) fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        }
        _ => Ok(default),
    }
}
