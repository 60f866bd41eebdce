//! The request-processing pipeline.
//!
//! Control flow for every candidate message:
//!
//! ```text
//! Poller → Parser → Gate → Provisioner → Dispatcher → ledger → mark-processed
//! ```
//!
//! Parsing and authorization are pure; provisioning and notification are
//! the only components that talk to the outside world, and both go
//! through narrow trait contracts.

pub mod authorize;
pub mod dispatch;
pub mod parser;
pub mod poller;
pub mod provision;
pub mod types;
