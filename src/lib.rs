//! Account Relay — email-driven account provisioning.
//!
//! Pre-authorized senders email structured account requests to a
//! monitored mailbox; each poll cycle parses, authorizes, provisions,
//! and notifies, with a durable per-message ledger guaranteeing
//! at-most-once provisioning under retried runs.

pub mod config;
pub mod credential;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod mailbox;
pub mod outbound;
pub mod pipeline;
pub mod server;
