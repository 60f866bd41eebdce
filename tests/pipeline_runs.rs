//! Integration tests for the request-processing pipeline.
//!
//! Each test wires a real poller and in-memory ledger to mock
//! collaborators and exercises a full poll cycle — the same contract the
//! HTTP trigger drives in production.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};

use account_relay::config::AppConfig;
use account_relay::directory::Directory;
use account_relay::error::{Error, MailboxError, NotificationError, ProviderError};
use account_relay::ledger::{Ledger, LibSqlLedger, ProcessingState, ProvisionedDetail};
use account_relay::mailbox::Mailbox;
use account_relay::outbound::Notifier;
use account_relay::pipeline::authorize::AllowList;
use account_relay::pipeline::dispatch::NotificationDispatcher;
use account_relay::pipeline::poller::MailboxPoller;
use account_relay::pipeline::provision::AccountProvisioner;
use account_relay::pipeline::types::{IncomingMessage, ProvisioningStatus};

const WELL_FORMED_BODY: &str = "First Name: Jane\n\
                                Last Name: Smith\n\
                                Username: jane.smith\n\
                                Department: Volunteers\n\
                                Title: Event Coordinator";

// ── Mock collaborators ──────────────────────────────────────────────

#[derive(Default)]
struct MockMailbox {
    messages: Vec<IncomingMessage>,
    processed: Mutex<Vec<String>>,
    /// Keep listing messages even after mark_processed — simulates the
    /// crash-retry window where the unread flag was never updated.
    always_relist: bool,
    fail_listing: bool,
    fail_marks: bool,
}

#[async_trait]
impl Mailbox for MockMailbox {
    async fn list_candidates(&self) -> Result<Vec<IncomingMessage>, MailboxError> {
        if self.fail_listing {
            return Err(MailboxError::Connect("imap unreachable".into()));
        }
        let processed = self.processed.lock().unwrap();
        Ok(self
            .messages
            .iter()
            .filter(|m| self.always_relist || !processed.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError> {
        if self.fail_marks {
            return Err(MailboxError::Protocol("store failed".into()));
        }
        self.processed.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct MockDirectory {
    existing: Mutex<HashSet<String>>,
    exists_calls: AtomicUsize,
    create_calls: Mutex<Vec<String>>,
    issued_credentials: Mutex<Vec<String>>,
}

#[async_trait]
impl Directory for MockDirectory {
    async fn user_exists(&self, primary_address: &str) -> Result<bool, ProviderError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.existing.lock().unwrap().contains(primary_address))
    }

    async fn create_user(
        &self,
        _request: &account_relay::pipeline::types::AccountRequest,
        primary_address: &str,
        credential: &SecretString,
        _org_unit: &str,
        force_password_change: bool,
    ) -> Result<(), ProviderError> {
        assert!(force_password_change);
        self.create_calls
            .lock()
            .unwrap()
            .push(primary_address.to_string());
        self.issued_credentials
            .lock()
            .unwrap()
            .push(credential.expose_secret().to_string());
        self.existing
            .lock()
            .unwrap()
            .insert(primary_address.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct MockNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl MockNotifier {
    fn sent_to(&self, address: &str) -> Vec<(String, String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _, _)| to == address)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ── Fixture ─────────────────────────────────────────────────────────

fn test_config() -> AppConfig {
    AppConfig {
        domain: "org.example".into(),
        allow_list: AllowList::new(["director@org.example"]),
        admin_address: "admin@org.example".into(),
        org_unit: "/Volunteers".into(),
        provider_max_attempts: 3,
        provider_backoff: Duration::from_millis(1),
        run_timeout: Duration::from_secs(300),
        http_port: 0,
        ledger_path: ":memory:".into(),
    }
}

fn message(id: &str, sender: &str, body: &str, minute: u32) -> IncomingMessage {
    IncomingMessage {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: "New Account Request".into(),
        body: body.to_string(),
        received_at: Utc.with_ymd_and_hms(2025, 1, 6, 10, minute, 0).unwrap(),
    }
}

struct Harness {
    mailbox: Arc<MockMailbox>,
    directory: Arc<MockDirectory>,
    notifier: Arc<MockNotifier>,
    ledger: Arc<LibSqlLedger>,
    poller: MailboxPoller,
}

async fn harness(mailbox: MockMailbox) -> Harness {
    let config = test_config();
    let mailbox = Arc::new(mailbox);
    let directory = Arc::new(MockDirectory::default());
    let notifier = Arc::new(MockNotifier::default());
    let ledger = Arc::new(LibSqlLedger::in_memory().await.unwrap());

    let provisioner = AccountProvisioner::new(
        Arc::clone(&directory) as Arc<dyn Directory>,
        &config,
    );
    let dispatcher =
        NotificationDispatcher::new(Arc::clone(&notifier) as Arc<dyn Notifier>, &config);
    let poller = MailboxPoller::new(
        Arc::clone(&mailbox) as Arc<dyn Mailbox>,
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        config.allow_list.clone(),
        provisioner,
        dispatcher,
    );

    Harness {
        mailbox,
        directory,
        notifier,
        ledger,
        poller,
    }
}

async fn state_of(ledger: &LibSqlLedger, id: &str) -> ProcessingState {
    ledger.get(id).await.unwrap().unwrap().state()
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn authorized_request_provisions_and_finalizes() {
    let h = harness(MockMailbox {
        messages: vec![message("m1", "director@org.example", WELL_FORMED_BODY, 0)],
        ..Default::default()
    })
    .await;

    let summary = h.poller.run().await.unwrap();
    assert_eq!(summary.listed, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.notification_failures, 0);

    // Exactly one account created, under the configured domain.
    assert_eq!(
        *h.directory.create_calls.lock().unwrap(),
        vec!["jane.smith@org.example".to_string()]
    );

    // Requester got the credential; the admin audit copy did not.
    let credential = h.directory.issued_credentials.lock().unwrap()[0].clone();
    let to_requester = h.notifier.sent_to("director@org.example");
    assert_eq!(to_requester.len(), 1);
    assert!(to_requester[0].2.contains(&credential));
    assert!(to_requester[0].2.contains("jane.smith@org.example"));

    let to_admin = h.notifier.sent_to("admin@org.example");
    assert_eq!(to_admin.len(), 1);
    assert!(!to_admin[0].2.contains(&credential));

    assert_eq!(state_of(&h.ledger, "m1").await, ProcessingState::Finalized);
    assert_eq!(*h.mailbox.processed.lock().unwrap(), vec!["m1".to_string()]);
}

#[tokio::test]
async fn display_name_sender_is_reduced_to_envelope_address() {
    let h = harness(MockMailbox {
        messages: vec![message(
            "m1",
            "Jane Director <director@org.example>",
            WELL_FORMED_BODY,
            0,
        )],
        ..Default::default()
    })
    .await;

    let summary = h.poller.run().await.unwrap();
    assert_eq!(summary.created, 1);
    // The credential email goes to the bare address.
    assert_eq!(h.notifier.sent_to("director@org.example").len(), 1);
}

#[tokio::test]
async fn unauthorized_sender_is_denied_without_provider_call() {
    let h = harness(MockMailbox {
        messages: vec![message("m1", "random@external.example", WELL_FORMED_BODY, 0)],
        ..Default::default()
    })
    .await;

    let summary = h.poller.run().await.unwrap();
    assert_eq!(summary.denied, 1);
    assert_eq!(summary.created, 0);

    // No provider traffic of any kind, and no credential ever generated.
    assert_eq!(h.directory.exists_calls.load(Ordering::SeqCst), 0);
    assert!(h.directory.create_calls.lock().unwrap().is_empty());
    assert!(h.directory.issued_credentials.lock().unwrap().is_empty());

    // Admin alerted; nothing echoed back to the unauthorized sender.
    assert_eq!(h.notifier.sent_to("admin@org.example").len(), 1);
    assert!(h.notifier.sent_to("random@external.example").is_empty());

    assert_eq!(state_of(&h.ledger, "m1").await, ProcessingState::Denied);
    assert_eq!(*h.mailbox.processed.lock().unwrap(), vec!["m1".to_string()]);
}

#[tokio::test]
async fn missing_username_fails_parse_before_authorization() {
    let body = "First Name: Jane\nLast Name: Smith\nDepartment: Volunteers\nTitle: Coordinator";
    let h = harness(MockMailbox {
        messages: vec![message("m1", "director@org.example", body, 0)],
        ..Default::default()
    })
    .await;

    let summary = h.poller.run().await.unwrap();
    assert_eq!(summary.parse_failed, 1);

    // The record went Received → ParseFailed; authorization never ran.
    let record = h.ledger.get("m1").await.unwrap().unwrap();
    let states: Vec<ProcessingState> = record.transitions.iter().map(|t| t.state).collect();
    assert_eq!(
        states,
        vec![ProcessingState::Received, ProcessingState::ParseFailed]
    );

    assert_eq!(h.directory.exists_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.notifier.sent_to("admin@org.example").len(), 1);
    assert!(h.notifier.sent_to("director@org.example").is_empty());
}

#[tokio::test]
async fn replayed_message_never_reprovisions() {
    let h = harness(MockMailbox {
        messages: vec![message("m1", "director@org.example", WELL_FORMED_BODY, 0)],
        always_relist: true,
        ..Default::default()
    })
    .await;

    let first = h.poller.run().await.unwrap();
    assert_eq!(first.created, 1);

    // The unread flag "failed" to stick — the same message is listed
    // again. The terminal ledger entry must short-circuit everything.
    let second = h.poller.run().await.unwrap();
    assert_eq!(second.skipped_terminal, 1);
    assert_eq!(second.created, 0);

    assert_eq!(h.directory.create_calls.lock().unwrap().len(), 1);
    // No extra notifications either — two from the first run only.
    assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn crash_resume_after_provisioned_skips_provider() {
    let h = harness(MockMailbox {
        messages: vec![message("m1", "director@org.example", WELL_FORMED_BODY, 0)],
        ..Default::default()
    })
    .await;

    // Simulate a previous run that crashed right after recording
    // Provisioned — before notification and finalization.
    for state in [
        ProcessingState::Received,
        ProcessingState::Parsed,
        ProcessingState::Authorized,
    ] {
        h.ledger.record_transition("m1", state, None).await.unwrap();
    }
    let detail = ProvisionedDetail {
        primary_address: "jane.smith@org.example".into(),
        status: ProvisioningStatus::Created,
    };
    h.ledger
        .record_transition("m1", ProcessingState::Provisioned, Some(&detail.to_json()))
        .await
        .unwrap();

    let summary = h.poller.run().await.unwrap();

    // No provider call of any kind on resume.
    assert_eq!(h.directory.exists_calls.load(Ordering::SeqCst), 0);
    assert!(h.directory.create_calls.lock().unwrap().is_empty());

    // Requester and admin both hear about the follow-up; the message
    // finishes its lifecycle.
    assert_eq!(h.notifier.sent_to("director@org.example").len(), 1);
    assert_eq!(h.notifier.sent_to("admin@org.example").len(), 1);
    assert_eq!(state_of(&h.ledger, "m1").await, ProcessingState::Finalized);
    assert_eq!(*h.mailbox.processed.lock().unwrap(), vec!["m1".to_string()]);
    assert_eq!(summary.already_exists, 1);
}

#[tokio::test]
async fn duplicate_username_short_circuits_without_create() {
    let h = harness(MockMailbox {
        messages: vec![message("m1", "director@org.example", WELL_FORMED_BODY, 0)],
        ..Default::default()
    })
    .await;
    h.directory
        .existing
        .lock()
        .unwrap()
        .insert("jane.smith@org.example".into());

    let summary = h.poller.run().await.unwrap();
    assert_eq!(summary.already_exists, 1);
    assert_eq!(summary.created, 0);

    assert!(h.directory.create_calls.lock().unwrap().is_empty());
    assert!(h.directory.issued_credentials.lock().unwrap().is_empty());

    let to_requester = h.notifier.sent_to("director@org.example");
    assert_eq!(to_requester.len(), 1);
    assert!(to_requester[0].2.contains("already exists"));

    assert_eq!(state_of(&h.ledger, "m1").await, ProcessingState::Finalized);
}

#[tokio::test]
async fn messages_process_in_receipt_order() {
    let h = harness(MockMailbox {
        messages: vec![
            message(
                "m1",
                "director@org.example",
                "First Name: A\nLast Name: One\nUsername: a.one\nDepartment: X\nTitle: T",
                0,
            ),
            message(
                "m2",
                "director@org.example",
                "First Name: B\nLast Name: Two\nUsername: b.two\nDepartment: X\nTitle: T",
                5,
            ),
        ],
        ..Default::default()
    })
    .await;

    let summary = h.poller.run().await.unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(
        *h.directory.create_calls.lock().unwrap(),
        vec![
            "a.one@org.example".to_string(),
            "b.two@org.example".to_string()
        ]
    );
}

#[tokio::test]
async fn mailbox_listing_failure_aborts_the_run() {
    let h = harness(MockMailbox {
        fail_listing: true,
        ..Default::default()
    })
    .await;

    let err = h.poller.run().await.unwrap_err();
    assert!(matches!(err, Error::Mailbox(_)));
}

#[tokio::test]
async fn infra_failure_mid_run_stops_further_processing() {
    let h = harness(MockMailbox {
        messages: vec![
            message("m1", "director@org.example", WELL_FORMED_BODY, 0),
            message(
                "m2",
                "director@org.example",
                "First Name: B\nLast Name: Two\nUsername: b.two\nDepartment: X\nTitle: T",
                5,
            ),
        ],
        fail_marks: true,
        ..Default::default()
    })
    .await;

    // First message provisions, then mark_processed blows up — the run
    // aborts before the second message is ever touched.
    let err = h.poller.run().await.unwrap_err();
    assert!(matches!(err, Error::Mailbox(_)));

    assert_eq!(h.directory.create_calls.lock().unwrap().len(), 1);
    assert!(h.ledger.get("m2").await.unwrap().is_none());
}

// ── HTTP trigger ────────────────────────────────────────────────────

#[tokio::test]
async fn trigger_endpoint_runs_a_cycle_and_reports_counts() {
    let config = test_config();
    let mailbox = Arc::new(MockMailbox {
        messages: vec![message("m1", "director@org.example", WELL_FORMED_BODY, 0)],
        ..Default::default()
    });
    let directory = Arc::new(MockDirectory::default());
    let notifier = Arc::new(MockNotifier::default());
    let ledger = Arc::new(LibSqlLedger::in_memory().await.unwrap());

    let poller = Arc::new(MailboxPoller::new(
        Arc::clone(&mailbox) as Arc<dyn Mailbox>,
        ledger as Arc<dyn Ledger>,
        config.allow_list.clone(),
        AccountProvisioner::new(directory as Arc<dyn Directory>, &config),
        NotificationDispatcher::new(notifier as Arc<dyn Notifier>, &config),
    ));

    let app = account_relay::server::trigger_routes(poller, Duration::from_secs(30));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://127.0.0.1:{port}/healthz"))
        .send()
        .await
        .unwrap();
    assert!(health.status().is_success());

    let response = client
        .post(format!("http://127.0.0.1:{port}/run"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let summary: serde_json::Value = response.json().await.unwrap();
    assert_eq!(summary["listed"], 1);
    assert_eq!(summary["created"], 1);
    assert_eq!(summary["denied"], 0);

    // A second trigger finds nothing unread.
    let response = client
        .post(format!("http://127.0.0.1:{port}/run"))
        .send()
        .await
        .unwrap();
    let summary: serde_json::Value = response.json().await.unwrap();
    assert_eq!(summary["listed"], 0);
}
