//! Authorization gate — deny-by-default allow-list check.
//!
//! A pure decision function: no I/O, no retries. The comparison is a
//! case-insensitive exact match on the raw envelope address; display
//! names never participate, so a spoofed `Director <evil@x>` header
//! cannot substitute for an authorized address.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{info, warn};

use crate::pipeline::types::{AuthorizationDecision, AuthorizationOutcome, IncomingMessage};

// ── Allow-list ──────────────────────────────────────────────────────

/// Immutable, case-insensitive set of authorized sender addresses.
///
/// Constructed once per run from configuration and passed in explicitly —
/// never read from ambient global state.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    addresses: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses = addresses
            .into_iter()
            .map(|a| a.as_ref().trim().to_ascii_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        Self { addresses }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(&address.trim().to_ascii_lowercase())
    }
}

// ── Decision ────────────────────────────────────────────────────────

/// Reduce a `Display Name <user@host>` header value to the bare address.
pub fn envelope_address(raw: &str) -> &str {
    static ANGLE: OnceLock<Regex> = OnceLock::new();
    let re = ANGLE.get_or_init(|| Regex::new(r"<([^>]+)>").expect("static pattern compiles"));
    re.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim()
}

/// Decide whether the message's sender may request account creation.
///
/// Deny by default: an empty allow-list denies everything, and any
/// sender not on the list is denied — there is no fallthrough.
pub fn authorize(message: &IncomingMessage, allow_list: &AllowList) -> AuthorizationDecision {
    let address = envelope_address(&message.sender);

    let (outcome, reason) = if allow_list.is_empty() {
        (
            AuthorizationOutcome::Denied,
            "allow-list is empty; denying by default".to_string(),
        )
    } else if allow_list.contains(address) {
        (
            AuthorizationOutcome::Allowed,
            format!("{address} is on the allow-list"),
        )
    } else {
        (
            AuthorizationOutcome::Denied,
            format!("{address} is not on the allow-list"),
        )
    };

    match outcome {
        AuthorizationOutcome::Allowed => {
            info!(id = %message.id, sender = %address, "Authorized request")
        }
        AuthorizationOutcome::Denied => {
            warn!(id = %message.id, sender = %address, %reason, "Unauthorized request")
        }
    }

    AuthorizationDecision {
        source_message_id: message.id.clone(),
        sender_address: address.to_string(),
        outcome,
        reason,
    }
}
