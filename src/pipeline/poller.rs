//! Mailbox poller — drives each candidate message through the pipeline.
//!
//! Ordering is the whole point of this module: `mark_processed` is
//! issued only after the message's processing record holds a terminal
//! state. A crash before that leaves the message unread, so the next run
//! retries it (at-least-once delivery into the pipeline), while the
//! ledger keyed by message id keeps provisioning at-most-once.
//!
//! Messages are processed strictly sequentially in receipt order.
//! Infrastructure failures (mailbox, ledger) abort the run immediately;
//! per-message outcomes never do.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::ledger::{Ledger, ProcessingRecord, ProcessingState, ProvisionedDetail};
use crate::mailbox::Mailbox;
use crate::pipeline::authorize::{self, AllowList};
use crate::pipeline::dispatch::NotificationDispatcher;
use crate::pipeline::parser;
use crate::pipeline::provision::AccountProvisioner;
use crate::pipeline::types::{IncomingMessage, ProvisioningStatus, RunSummary};

/// Pipeline orchestrator for one mailbox.
pub struct MailboxPoller {
    mailbox: Arc<dyn Mailbox>,
    ledger: Arc<dyn Ledger>,
    allow_list: AllowList,
    provisioner: AccountProvisioner,
    dispatcher: NotificationDispatcher,
}

impl MailboxPoller {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        ledger: Arc<dyn Ledger>,
        allow_list: AllowList,
        provisioner: AccountProvisioner,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            mailbox,
            ledger,
            allow_list,
            provisioner,
            dispatcher,
        }
    }

    /// Run one full poll cycle.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let candidates = self.mailbox.list_candidates().await?;
        let mut summary = RunSummary {
            listed: candidates.len(),
            ..Default::default()
        };
        info!(count = candidates.len(), "Poll cycle started");

        // Strictly sequential, oldest first — no parallel provisioning
        // within a run.
        for message in &candidates {
            self.process_message(message, &mut summary).await?;
        }

        info!(
            created = summary.created,
            already_exists = summary.already_exists,
            denied = summary.denied,
            parse_failed = summary.parse_failed,
            provisioning_failed = summary.provisioning_failed,
            "Poll cycle complete"
        );
        Ok(summary)
    }

    async fn process_message(
        &self,
        message: &IncomingMessage,
        summary: &mut RunSummary,
    ) -> Result<(), Error> {
        let record = self.ledger.get(&message.id).await?;

        if let Some(rec) = &record {
            if rec.is_terminal() {
                // Crash window: terminal state recorded but mark-processed
                // never issued. Close it out without reprocessing.
                debug!(id = %message.id, state = %rec.state(), "Already terminal; marking processed");
                summary.skipped_terminal += 1;
                self.mailbox.mark_processed(&message.id).await?;
                return Ok(());
            }
            if rec.reached(ProcessingState::Provisioned) {
                return self.resume_provisioned(message, rec, summary).await;
            }
        }

        let reached = |state| record.as_ref().is_some_and(|r| r.reached(state));

        if record.is_none() {
            self.ledger
                .record_transition(&message.id, ProcessingState::Received, None)
                .await?;
        }

        // Parse. Pure, so resumed messages just re-run it.
        let request = match parser::parse(&message.body, &message.id) {
            Ok(request) => request,
            Err(e) => {
                // ParseFailed is only reachable from Received; an immutable
                // message that parsed once cannot fail to parse later.
                warn!(id = %message.id, error = %e, "Request failed to parse");
                summary.parse_failed += 1;
                self.ledger
                    .record_transition(
                        &message.id,
                        ProcessingState::ParseFailed,
                        Some(&e.to_string()),
                    )
                    .await?;
                summary.notification_failures +=
                    self.dispatcher.parse_failed(message, &e).await.failed;
                self.mailbox.mark_processed(&message.id).await?;
                return Ok(());
            }
        };
        if !reached(ProcessingState::Parsed) {
            self.ledger
                .record_transition(&message.id, ProcessingState::Parsed, Some(&request.username))
                .await?;
        }

        let requester = authorize::envelope_address(&message.sender).to_string();

        // A record that already holds Authorized resumes past the gate —
        // the resume point is the first incomplete step, not scratch.
        if !reached(ProcessingState::Authorized) {
            let decision = authorize::authorize(message, &self.allow_list);
            if !decision.is_allowed() {
                summary.denied += 1;
                self.ledger
                    .record_transition(&message.id, ProcessingState::Denied, Some(&decision.reason))
                    .await?;
                summary.notification_failures += self.dispatcher.denied(&decision).await.failed;
                self.mailbox.mark_processed(&message.id).await?;
                return Ok(());
            }
            self.ledger
                .record_transition(
                    &message.id,
                    ProcessingState::Authorized,
                    Some(&decision.sender_address),
                )
                .await?;
        }

        let result = self.provisioner.provision(&request).await;
        match result.status {
            ProvisioningStatus::Failed => {
                summary.provisioning_failed += 1;
                self.ledger
                    .record_transition(
                        &message.id,
                        ProcessingState::ProvisioningFailed,
                        result.provider_detail.as_deref(),
                    )
                    .await?;
                summary.notification_failures += self
                    .dispatcher
                    .provisioning_failed(&requester, &result)
                    .await
                    .failed;
                self.mailbox.mark_processed(&message.id).await?;
            }
            status @ (ProvisioningStatus::Created | ProvisioningStatus::AlreadyExists) => {
                if status == ProvisioningStatus::Created {
                    summary.created += 1;
                } else {
                    summary.already_exists += 1;
                }

                // The detail carries what a resumed run needs to finish
                // without another provider call. Never the credential.
                let detail = ProvisionedDetail {
                    primary_address: result.primary_address.clone(),
                    status,
                }
                .to_json();
                self.ledger
                    .record_transition(&message.id, ProcessingState::Provisioned, Some(&detail))
                    .await?;

                let outcome = match status {
                    ProvisioningStatus::Created => {
                        self.dispatcher.created(&requester, &request, &result).await
                    }
                    _ => {
                        self.dispatcher
                            .already_exists(&requester, &result.primary_address)
                            .await
                    }
                };
                summary.notification_failures += outcome.failed;
                self.ledger
                    .record_transition(
                        &message.id,
                        ProcessingState::Notified,
                        Some(&outcome.ledger_detail()),
                    )
                    .await?;
                self.ledger
                    .record_transition(&message.id, ProcessingState::Finalized, None)
                    .await?;
                self.mailbox.mark_processed(&message.id).await?;
            }
        }
        Ok(())
    }

    /// Finish a message whose record already shows `Provisioned` — the
    /// provider is NOT called again. Notification and finalization pick
    /// up from whatever the interrupted run recorded.
    async fn resume_provisioned(
        &self,
        message: &IncomingMessage,
        rec: &ProcessingRecord,
        summary: &mut RunSummary,
    ) -> Result<(), Error> {
        info!(id = %message.id, "Resuming provisioned message without provider call");
        summary.already_exists += 1;

        let requester = authorize::envelope_address(&message.sender).to_string();
        let (primary_address, status) = match rec
            .detail_for(ProcessingState::Provisioned)
            .and_then(ProvisionedDetail::from_json)
        {
            Some(d) => (d.primary_address, d.status),
            // Detail missing or corrupt — rebuild the address from the
            // message itself and assume the conservative case.
            None => {
                let address = parser::parse(&message.body, &message.id)
                    .map(|r| self.provisioner.primary_address(&r.username))
                    .unwrap_or_else(|_| "(unknown address)".to_string());
                (address, ProvisioningStatus::Created)
            }
        };

        if !rec.reached(ProcessingState::Notified) {
            let outcome = match status {
                // The interrupted run never held a credential for this
                // address, so a plain already-exists notice is accurate.
                ProvisioningStatus::AlreadyExists => {
                    self.dispatcher
                        .already_exists(&requester, &primary_address)
                        .await
                }
                // The credential died with the interrupted run.
                _ => {
                    self.dispatcher
                        .created_resumed(&requester, &primary_address)
                        .await
                }
            };
            summary.notification_failures += outcome.failed;
            self.ledger
                .record_transition(
                    &message.id,
                    ProcessingState::Notified,
                    Some(&outcome.ledger_detail()),
                )
                .await?;
        }

        self.ledger
            .record_transition(&message.id, ProcessingState::Finalized, None)
            .await?;
        self.mailbox.mark_processed(&message.id).await?;
        Ok(())
    }
}
