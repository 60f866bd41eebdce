//! Outbound notification collaborator.
//!
//! Fire-and-forget with a success/failure result. The dispatcher decides
//! who hears what; this layer only moves bytes.

pub mod smtp;

pub use smtp::{SmtpConfig, SmtpNotifier};

use async_trait::async_trait;

use crate::error::NotificationError;

/// Narrow contract for sending outcome emails.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError>;
}
