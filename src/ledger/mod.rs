//! Processing ledger — durable, append-only per-message state records.
//!
//! The ledger is the idempotency source of truth: the poller consults it
//! to skip messages that already reached a terminal state, and every
//! component persists its outcome here for audit. A message that crashed
//! mid-pipeline resumes from its first incomplete step on the next run.

pub mod libsql_backend;
pub mod model;

pub use libsql_backend::LibSqlLedger;
pub use model::{ProcessingRecord, ProcessingState, ProvisionedDetail, Transition};

use async_trait::async_trait;

use crate::error::LedgerError;

/// Append-only store of per-message processing state.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetch the full record for a message id, if any transitions exist.
    async fn get(&self, message_id: &str) -> Result<Option<ProcessingRecord>, LedgerError>;

    /// Append a state transition.
    ///
    /// Rejects transitions the state machine does not allow: skipped
    /// states, leaving a terminal state, or an opening state other than
    /// `Received`.
    async fn record_transition(
        &self,
        message_id: &str,
        state: ProcessingState,
        detail: Option<&str>,
    ) -> Result<(), LedgerError>;
}
