//! Notification dispatcher — outcome emails for requester and
//! administrator.
//!
//! Routing policy, enforced here and nowhere else:
//! - the temporary credential goes to the requester's email and to no
//!   other channel — the administrator's audit copy never contains it;
//! - unauthorized senders hear nothing; denial alerts go to the
//!   administrator only;
//! - provider error detail goes to the administrator only; the requester
//!   gets a generic failure note.
//!
//! Send failures never unwind a completed provisioning — they come back
//! in the [`DispatchOutcome`] so the poller can record a follow-up
//! condition on the processing record.

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::warn;

use crate::config::AppConfig;
use crate::error::ParseError;
use crate::outbound::Notifier;
use crate::pipeline::types::{
    AccountRequest, AuthorizationDecision, IncomingMessage, ProvisioningResult,
};

/// Outcome of a dispatch round.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub attempted: usize,
    pub failed: usize,
    notes: Vec<String>,
}

impl DispatchOutcome {
    pub fn all_sent(&self) -> bool {
        self.failed == 0
    }

    /// Detail string for the `Notified` ledger transition.
    pub fn ledger_detail(&self) -> String {
        if self.all_sent() {
            format!("sent {} notification(s)", self.attempted)
        } else {
            format!(
                "notification_failed ({}/{}): {}",
                self.failed,
                self.attempted,
                self.notes.join("; ")
            )
        }
    }
}

/// Sends outcome emails through the [`Notifier`] collaborator.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    admin_address: String,
    domain: String,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: &AppConfig) -> Self {
        Self {
            notifier,
            admin_address: config.admin_address.clone(),
            domain: config.domain.clone(),
        }
    }

    /// Account created: credential email to the requester, audit copy
    /// (without the credential) to the administrator.
    pub async fn created(
        &self,
        requester: &str,
        request: &AccountRequest,
        result: &ProvisioningResult,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let credential = result
            .temporary_credential
            .as_ref()
            .map(|c| c.expose_secret().to_string())
            .unwrap_or_else(|| "(credential unavailable — contact the administrator)".into());

        let requester_body = format!(
            "Hello,\n\n\
             The account has been created:\n\n\
             Name: {} {}\n\
             Email: {}\n\
             Temporary password: {}\n\
             Department: {}\n\
             Title: {}\n\n\
             The user must change this password at first login. Please\n\
             share these credentials securely with the new user.\n\n\
             {} account service",
            request.first_name,
            request.last_name,
            result.primary_address,
            credential,
            request.department,
            request.title,
            self.domain,
        );
        self.try_send(
            &mut outcome,
            requester,
            &format!("Account created: {}", result.primary_address),
            requester_body,
        )
        .await;

        // Audit copy. The credential is deliberately absent.
        let admin_body = format!(
            "Account {} created for {} {} (requested by {}).",
            result.primary_address, request.first_name, request.last_name, requester,
        );
        self.try_send(
            &mut outcome,
            &self.admin_address,
            &format!("New account created: {}", result.primary_address),
            admin_body,
        )
        .await;

        outcome
    }

    /// Account creation finished in a previous, interrupted run. The
    /// credential from that run is gone, so the requester is pointed at
    /// the administrator for a reset.
    pub async fn created_resumed(&self, requester: &str, primary_address: &str) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let requester_body = format!(
            "Hello,\n\n\
             The account {primary_address} was created, but its temporary\n\
             password could not be delivered. Please contact the\n\
             administrator at {} for a password reset.\n\n\
             {} account service",
            self.admin_address, self.domain,
        );
        self.try_send(
            &mut outcome,
            requester,
            &format!("Account created: {primary_address}"),
            requester_body,
        )
        .await;

        let admin_body = format!(
            "Account {primary_address} was created in an interrupted run and\n\
             its credential was not delivered. A manual password reset is\n\
             required. Requested by {requester}.",
        );
        self.try_send(
            &mut outcome,
            &self.admin_address,
            &format!("Follow-up needed: {primary_address}"),
            admin_body,
        )
        .await;

        outcome
    }

    /// Address already taken — no credential was ever generated.
    pub async fn already_exists(&self, requester: &str, primary_address: &str) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let requester_body = format!(
            "Hello,\n\n\
             The account {primary_address} already exists. If a password\n\
             reset or account change is needed, please contact the\n\
             administrator at {}.\n\n\
             {} account service",
            self.admin_address, self.domain,
        );
        self.try_send(
            &mut outcome,
            requester,
            &format!("Account already exists: {primary_address}"),
            requester_body,
        )
        .await;

        let admin_body =
            format!("Request from {requester} for {primary_address}: address already exists.");
        self.try_send(
            &mut outcome,
            &self.admin_address,
            &format!("Duplicate account request: {primary_address}"),
            admin_body,
        )
        .await;

        outcome
    }

    /// Unauthorized sender — administrator alert only. Nothing is echoed
    /// back to the sender.
    pub async fn denied(&self, decision: &AuthorizationDecision) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let admin_body = format!(
            "Unauthorized account creation attempt.\n\n\
             Sender: {}\n\
             Message: {}\n\
             Reason: {}",
            decision.sender_address, decision.source_message_id, decision.reason,
        );
        self.try_send(
            &mut outcome,
            &self.admin_address,
            &format!("Unauthorized account request from {}", decision.sender_address),
            admin_body,
        )
        .await;

        outcome
    }

    /// Unparseable request — administrator alert only; the message never
    /// reached authorization.
    pub async fn parse_failed(
        &self,
        message: &IncomingMessage,
        error: &ParseError,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let admin_body = format!(
            "An account request could not be parsed.\n\n\
             Sender: {}\n\
             Subject: {}\n\
             Message: {}\n\
             Error: {error}\n\n\
             The sender must resend a corrected request.",
            message.sender, message.subject, message.id,
        );
        self.try_send(
            &mut outcome,
            &self.admin_address,
            "Malformed account request",
            admin_body,
        )
        .await;

        outcome
    }

    /// Provider gave up — full detail to the administrator, a generic
    /// note to the requester.
    pub async fn provisioning_failed(
        &self,
        requester: &str,
        result: &ProvisioningResult,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let admin_body = format!(
            "Provisioning failed for {}.\n\n\
             Requested by: {requester}\n\
             Provider detail: {}",
            result.primary_address,
            result.provider_detail.as_deref().unwrap_or("(none)"),
        );
        self.try_send(
            &mut outcome,
            &self.admin_address,
            &format!("Provisioning failed: {}", result.primary_address),
            admin_body,
        )
        .await;

        let requester_body = format!(
            "Hello,\n\n\
             Your account request could not be processed. The\n\
             administrator has been notified and will follow up.\n\n\
             {} account service",
            self.domain,
        );
        self.try_send(
            &mut outcome,
            requester,
            "Account request could not be processed",
            requester_body,
        )
        .await;

        outcome
    }

    async fn try_send(&self, outcome: &mut DispatchOutcome, to: &str, subject: &str, body: String) {
        outcome.attempted += 1;
        if let Err(e) = self.notifier.send(to, subject, &body).await {
            warn!(to, error = %e, "Notification send failed");
            outcome.failed += 1;
            outcome.notes.push(format!("{to}: {e}"));
        }
    }
}
