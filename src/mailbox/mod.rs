//! Mailbox collaborator — the source of candidate request messages.
//!
//! The pipeline only ever sees this narrow contract. The mailbox's
//! unread/processed flag is the primary run-to-run exclusion signal, so
//! `mark_processed` must be the *only* operation that mutates it —
//! listing is read-only.

pub mod imap;

pub use imap::{ImapMailbox, MailboxConfig};

use async_trait::async_trait;

use crate::error::MailboxError;
use crate::pipeline::types::IncomingMessage;

/// Narrow contract over the external message store.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// List unread/unprocessed messages, oldest first.
    ///
    /// Ascending receipt order preserves request order under rate limits.
    async fn list_candidates(&self) -> Result<Vec<IncomingMessage>, MailboxError>;

    /// Mark a message processed so no later run picks it up again.
    ///
    /// Idempotent. Called once per message, only after its processing
    /// record reached a terminal state.
    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError>;
}
