//! Shared types for the request-processing pipeline.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

// ── Incoming message ────────────────────────────────────────────────

/// A candidate request message fetched from the mailbox.
///
/// Immutable once fetched — the pipeline never rewrites message content,
/// it only records processing state keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Provider-native unique message id.
    pub id: String,
    /// Raw envelope sender. May still carry a `Display Name <addr>` form;
    /// authorization reduces it to the bare address first.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

// ── Account request ─────────────────────────────────────────────────

/// A structured account request, derived from exactly one message.
///
/// All fields are required and non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRequest {
    pub first_name: String,
    pub last_name: String,
    /// Local part of the new primary address. Restricted to letters,
    /// digits, `.`, `-` and `_`.
    pub username: String,
    pub department: String,
    pub title: String,
    /// Id of the message this request was parsed from.
    pub source_message_id: String,
}

// ── Authorization ───────────────────────────────────────────────────

/// Whether a sender may request account creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    Allowed,
    Denied,
}

/// The gate's decision for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub source_message_id: String,
    /// The bare envelope address the decision was made on.
    pub sender_address: String,
    pub outcome: AuthorizationOutcome,
    pub reason: String,
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        self.outcome == AuthorizationOutcome::Allowed
    }
}

// ── Provisioning ────────────────────────────────────────────────────

/// Outcome of a directory create attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    /// Account was created and a credential issued.
    Created,
    /// The primary address was already taken — nothing was created.
    AlreadyExists,
    /// The provider refused or kept failing; detail says why.
    Failed,
}

impl std::fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of invoking the directory service for one request.
///
/// The temporary credential is present only for `Created` and is never
/// serialized, logged, or written to the ledger — it reaches exactly one
/// place: the requester's notification email.
#[derive(Debug)]
pub struct ProvisioningResult {
    /// Full primary address of the (new or pre-existing) account.
    pub primary_address: String,
    pub temporary_credential: Option<SecretString>,
    pub status: ProvisioningStatus,
    /// Provider error detail for `Failed`. Shown to the administrator
    /// only — never forwarded to the requester.
    pub provider_detail: Option<String>,
}

// ── Run summary ─────────────────────────────────────────────────────

/// Counters for one poll cycle, returned to the trigger caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Candidate messages the mailbox listed.
    pub listed: usize,
    /// Accounts created this run.
    pub created: usize,
    /// Requests short-circuited because the address already existed.
    pub already_exists: usize,
    /// Requests denied by the authorization gate.
    pub denied: usize,
    /// Messages that failed to parse.
    pub parse_failed: usize,
    /// Requests where the provider ultimately failed.
    pub provisioning_failed: usize,
    /// Messages skipped because the ledger already held a terminal state.
    pub skipped_terminal: usize,
    /// Outbound notifications that could not be sent (follow-up needed).
    pub notification_failures: usize,
}
