//! IMAP mailbox adapter — raw IMAP over TLS, parsed with `mail-parser`.
//!
//! Listing runs `UID SEARCH UNSEEN` and fetches each message without
//! touching flags; `mark_processed` stores `\Seen` by UID in a separate
//! short session. UIDs (not sequence numbers) are used throughout so the
//! two sessions agree on which message is which.

use std::collections::HashMap;
use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{parse_env, require_env};
use crate::error::{ConfigError, MailboxError};
use crate::mailbox::Mailbox;
use crate::pipeline::types::IncomingMessage;

/// Read timeout for the IMAP socket.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// IMAP mailbox configuration, built from environment variables.
#[derive(Debug)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl MailboxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: require_env("EMAIL_IMAP_HOST")?,
            port: parse_env("EMAIL_IMAP_PORT", 993)?,
            username: require_env("EMAIL_USERNAME")?,
            password: SecretString::from(require_env("EMAIL_PASSWORD")?),
        })
    }
}

// ── Mailbox adapter ─────────────────────────────────────────────────

/// IMAP-backed [`Mailbox`].
pub struct ImapMailbox {
    config: Arc<MailboxConfig>,
    /// message-id → IMAP UID, filled by listing, consumed by mark_processed.
    uid_map: Mutex<HashMap<String, String>>,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config: Arc::new(config),
            uid_map: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn list_candidates(&self) -> Result<Vec<IncomingMessage>, MailboxError> {
        let config = Arc::clone(&self.config);
        let fetched = tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| MailboxError::Protocol(format!("fetch task panicked: {e}")))?
            .map_err(|e| MailboxError::Protocol(e.to_string()))?;

        let mut messages = Vec::with_capacity(fetched.len());
        {
            let mut uid_map = self.uid_map.lock().expect("uid map lock poisoned");
            for (uid, message) in fetched {
                uid_map.insert(message.id.clone(), uid);
                messages.push(message);
            }
        }

        // Oldest first — request order is preserved under rate limits.
        messages.sort_by_key(|m| m.received_at);
        info!(count = messages.len(), "Listed candidate messages");
        Ok(messages)
    }

    async fn mark_processed(&self, message_id: &str) -> Result<(), MailboxError> {
        let uid = self
            .uid_map
            .lock()
            .expect("uid map lock poisoned")
            .get(message_id)
            .cloned()
            .ok_or_else(|| MailboxError::UnknownMessage(message_id.to_string()))?;

        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || store_seen(&config, &uid))
            .await
            .map_err(|e| MailboxError::Protocol(format!("store task panicked: {e}")))?
            .map_err(|e| MailboxError::Protocol(e.to_string()))?;

        debug!(message_id, "Marked processed");
        Ok(())
    }
}

// ── Blocking IMAP plumbing ──────────────────────────────────────────

type ImapError = Box<dyn std::error::Error + Send + Sync>;
type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One tagged IMAP session over TLS.
struct ImapSession {
    tls: TlsStream,
    tag: u32,
}

impl ImapSession {
    /// Connect, read the greeting, and log in.
    fn connect(config: &MailboxConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((&*config.host, config.port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls_pki_types::ServerName<'_> =
            rustls_pki_types::ServerName::try_from(config.host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self { tls, tag: 0 };
        let _greeting = session.read_line()?;

        let login = session.command(&format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ))?;
        if !response_ok(&login) {
            return Err("IMAP login failed".into());
        }
        Ok(session)
    }

    /// Send a tagged command and collect lines up to the tagged response.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        IoWrite::write_all(&mut self.tls, format!("{tag} {cmd}\r\n").as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// Whether a tagged response ended in OK.
fn response_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.contains("OK"))
}

/// Fetch unseen messages without altering any flags.
///
/// Returns `(uid, message)` pairs in mailbox order.
fn fetch_unseen(config: &MailboxConfig) -> Result<Vec<(String, IncomingMessage)>, ImapError> {
    let mut session = ImapSession::connect(config)?;

    let select = session.command("SELECT \"INBOX\"")?;
    if !response_ok(&select) {
        return Err("IMAP SELECT INBOX failed".into());
    }

    let search = session.command("UID SEARCH UNSEEN")?;
    let mut uids: Vec<String> = Vec::new();
    for line in &search {
        if line.starts_with("* SEARCH") {
            uids.extend(line.split_whitespace().skip(2).map(str::to_string));
        }
    }

    let mut results = Vec::new();
    for uid in &uids {
        let fetch = session.command(&format!("UID FETCH {uid} (RFC822)"))?;

        // Drop the untagged FETCH header and the closing/tagged lines;
        // what remains is the raw RFC822 literal.
        let raw: String = fetch
            .iter()
            .skip(1)
            .take(fetch.len().saturating_sub(2))
            .cloned()
            .collect();

        if let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) {
            let sender = parsed
                .from()
                .and_then(|addr| addr.first())
                .and_then(|a| a.address())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".into());
            let subject = parsed.subject().unwrap_or("(no subject)").to_string();
            let body = extract_text(&parsed);
            let id = parsed
                .message_id()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));
            let received_at = parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
                .unwrap_or_else(Utc::now);

            results.push((
                uid.clone(),
                IncomingMessage {
                    id,
                    sender,
                    subject,
                    body,
                    received_at,
                },
            ));
        }
    }

    session.logout();
    Ok(results)
}

/// Store `\Seen` on one message by UID.
fn store_seen(config: &MailboxConfig, uid: &str) -> Result<(), ImapError> {
    let mut session = ImapSession::connect(config)?;

    let select = session.command("SELECT \"INBOX\"")?;
    if !response_ok(&select) {
        return Err("IMAP SELECT INBOX failed".into());
    }

    let store = session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
    if !response_ok(&store) {
        return Err(format!("IMAP STORE failed for uid {uid}").into());
    }

    session.logout();
    Ok(())
}

/// Extract readable text from a parsed email — plain text, or HTML with
/// tags stripped.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                // Tag boundaries become line breaks so the line-oriented
                // request grammar still sees one field per line.
                result.push('\n');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
