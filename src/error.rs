//! Error types for account-relay.

use std::time::Duration;

/// Top-level error type for the service.
///
/// Only infrastructure failures travel through this type — per-message
/// outcomes (a bad request body, an unauthorized sender) are pipeline
/// decisions, not errors, and never abort a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Directory provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Request parsing errors — terminal per-message outcomes, never retried.
///
/// The requester must resend a corrected email; the administrator is
/// alerted instead of the pipeline looping on the same message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid username {username:?}: only letters, digits, '.', '-' and '_' are allowed")]
    InvalidUsername { username: String },
}

/// Directory provider errors, classified for the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Rate limits, timeouts, 5xx — eligible for bounded retry with backoff.
    #[error("Transient provider error: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Invalid fields, quota exceeded, policy violations — never retried.
    #[error("Permanent provider error: {reason}")]
    Permanent { reason: String },

    /// The primary address is already taken. Not a failure — the
    /// provisioner treats it as an idempotency short-circuit.
    #[error("Account {primary_address} already exists")]
    Duplicate { primary_address: String },
}

impl ProviderError {
    /// Whether this error is eligible for another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Provider-suggested delay before retrying, if it sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Outbound notification errors.
///
/// Never unwind a completed provisioning — recorded on the processing
/// record as a follow-up condition instead.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to send to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Mailbox infrastructure errors — abort the whole run.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox connection failed: {0}")]
    Connect(String),

    #[error("Mailbox protocol error: {0}")]
    Protocol(String),

    #[error("Unknown message id: {0}")]
    UnknownMessage(String),
}

/// Ledger errors — abort the whole run (the idempotency source of truth
/// is unavailable, so no further messages may be finalized).
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger backend error: {0}")]
    Backend(String),

    #[error("Invalid transition for {message_id}: {from} -> {to}")]
    InvalidTransition {
        message_id: String,
        from: String,
        to: String,
    },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
