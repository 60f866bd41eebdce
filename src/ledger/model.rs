//! Processing-ledger data model — the per-message state machine.
//!
//! State machine:
//!
//! ```text
//! Received → Parsed → {Authorized | Denied}
//!                      Authorized → {Provisioned | ProvisioningFailed}
//!                                    Provisioned → Notified → Finalized
//! Received → ParseFailed
//! ```
//!
//! Terminal states: `ParseFailed`, `Denied`, `ProvisioningFailed`,
//! `Finalized`. Once a record is terminal, the message is never
//! reprocessed — this is the central invariant of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::pipeline::types::ProvisioningStatus;

// ── States ──────────────────────────────────────────────────────────

/// Processing state of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Received,
    Parsed,
    ParseFailed,
    Authorized,
    Denied,
    Provisioned,
    ProvisioningFailed,
    Notified,
    Finalized,
}

impl ProcessingState {
    /// Terminal states permit mark-processed and nothing else.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ParseFailed | Self::Denied | Self::ProvisioningFailed | Self::Finalized
        )
    }

    /// Whether `next` is a legal successor. No transition skips a state,
    /// and nothing leaves a terminal state.
    pub fn allows(self, next: ProcessingState) -> bool {
        use ProcessingState::*;
        matches!(
            (self, next),
            (Received, Parsed)
                | (Received, ParseFailed)
                | (Parsed, Authorized)
                | (Parsed, Denied)
                | (Authorized, Provisioned)
                | (Authorized, ProvisioningFailed)
                | (Provisioned, Notified)
                | (Notified, Finalized)
        )
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Parsed => "parsed",
            Self::ParseFailed => "parse_failed",
            Self::Authorized => "authorized",
            Self::Denied => "denied",
            Self::Provisioned => "provisioned",
            Self::ProvisioningFailed => "provisioning_failed",
            Self::Notified => "notified",
            Self::Finalized => "finalized",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProcessingState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "parsed" => Ok(Self::Parsed),
            "parse_failed" => Ok(Self::ParseFailed),
            "authorized" => Ok(Self::Authorized),
            "denied" => Ok(Self::Denied),
            "provisioned" => Ok(Self::Provisioned),
            "provisioning_failed" => Ok(Self::ProvisioningFailed),
            "notified" => Ok(Self::Notified),
            "finalized" => Ok(Self::Finalized),
            _ => Err(format!("Unknown processing state: {s}")),
        }
    }
}

/// Validate that `next` may be appended after `current` (`None` = no
/// record yet; the only legal opening state is `Received`).
pub fn validate_transition(
    message_id: &str,
    current: Option<ProcessingState>,
    next: ProcessingState,
) -> Result<(), LedgerError> {
    let ok = match current {
        None => next == ProcessingState::Received,
        Some(cur) => cur.allows(next),
    };
    if ok {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            message_id: message_id.to_string(),
            from: current.map_or_else(|| "none".to_string(), |s| s.to_string()),
            to: next.to_string(),
        })
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// One recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub state: ProcessingState,
    pub recorded_at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// The full processing history for one message id. Append-only.
#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    pub message_id: String,
    /// Transitions in recorded order; non-empty by construction.
    pub transitions: Vec<Transition>,
}

impl ProcessingRecord {
    /// Current state — the most recent transition.
    pub fn state(&self) -> ProcessingState {
        self.transitions
            .last()
            .map_or(ProcessingState::Received, |t| t.state)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether the record ever reached `state`.
    pub fn reached(&self, state: ProcessingState) -> bool {
        self.transitions.iter().any(|t| t.state == state)
    }

    /// Detail recorded with the transition into `state`, if any.
    pub fn detail_for(&self, state: ProcessingState) -> Option<&str> {
        self.transitions
            .iter()
            .rev()
            .find(|t| t.state == state)
            .and_then(|t| t.detail.as_deref())
    }
}

// ── Provisioned detail ──────────────────────────────────────────────

/// Detail payload recorded with the `Provisioned` transition.
///
/// Carries exactly what a crash-resumed run needs to finish notification
/// and finalization without another provider call. The temporary
/// credential is never part of this payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedDetail {
    pub primary_address: String,
    pub status: ProvisioningStatus,
}

impl ProvisionedDetail {
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "primary_address": self.primary_address,
            "status": self.status,
        })
        .to_string()
    }

    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        for state in [
            ProcessingState::Received,
            ProcessingState::Parsed,
            ProcessingState::ParseFailed,
            ProcessingState::Authorized,
            ProcessingState::Denied,
            ProcessingState::Provisioned,
            ProcessingState::ProvisioningFailed,
            ProcessingState::Notified,
            ProcessingState::Finalized,
        ] {
            assert_eq!(state.to_string().parse::<ProcessingState>(), Ok(state));
        }
    }

    #[test]
    fn terminal_states_are_exactly_four() {
        use ProcessingState::*;
        for (state, terminal) in [
            (Received, false),
            (Parsed, false),
            (ParseFailed, true),
            (Authorized, false),
            (Denied, true),
            (Provisioned, false),
            (ProvisioningFailed, true),
            (Notified, false),
            (Finalized, true),
        ] {
            assert_eq!(state.is_terminal(), terminal, "{state}");
        }
    }

    #[test]
    fn happy_path_transitions_are_allowed() {
        use ProcessingState::*;
        let path = [Received, Parsed, Authorized, Provisioned, Notified, Finalized];
        for pair in path.windows(2) {
            assert!(pair[0].allows(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        use ProcessingState::*;
        assert!(!Received.allows(Authorized));
        assert!(!Received.allows(Provisioned));
        assert!(!Parsed.allows(Provisioned));
        assert!(!Authorized.allows(Finalized));
        assert!(!Provisioned.allows(Finalized));
    }

    #[test]
    fn nothing_leaves_a_terminal_state() {
        use ProcessingState::*;
        for terminal in [ParseFailed, Denied, ProvisioningFailed, Finalized] {
            for next in [Received, Parsed, Authorized, Provisioned, Notified, Finalized] {
                assert!(!terminal.allows(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn first_transition_must_be_received() {
        assert!(validate_transition("m", None, ProcessingState::Received).is_ok());
        assert!(matches!(
            validate_transition("m", None, ProcessingState::Parsed),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn record_accessors() {
        let record = ProcessingRecord {
            message_id: "m".into(),
            transitions: vec![
                Transition {
                    state: ProcessingState::Received,
                    recorded_at: Utc::now(),
                    detail: None,
                },
                Transition {
                    state: ProcessingState::Parsed,
                    recorded_at: Utc::now(),
                    detail: Some("ok".into()),
                },
            ],
        };
        assert_eq!(record.state(), ProcessingState::Parsed);
        assert!(!record.is_terminal());
        assert!(record.reached(ProcessingState::Received));
        assert!(!record.reached(ProcessingState::Authorized));
        assert_eq!(record.detail_for(ProcessingState::Parsed), Some("ok"));
        assert_eq!(record.detail_for(ProcessingState::Received), None);
    }

    #[test]
    fn provisioned_detail_round_trips() {
        let detail = ProvisionedDetail {
            primary_address: "jane.smith@org.example".into(),
            status: ProvisioningStatus::Created,
        };
        let parsed = ProvisionedDetail::from_json(&detail.to_json()).unwrap();
        assert_eq!(parsed, detail);
    }

    #[test]
    fn provisioned_detail_rejects_garbage() {
        assert!(ProvisionedDetail::from_json("not json").is_none());
        assert!(ProvisionedDetail::from_json("{}").is_none());
    }
}
