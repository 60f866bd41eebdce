//! SMTP notifier — outbound mail via lettre.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::config::{env_or, parse_env, require_env};
use crate::error::{ConfigError, NotificationError};
use crate::outbound::Notifier;

// ── Configuration ───────────────────────────────────────────────────

/// SMTP configuration, built from environment variables.
#[derive(Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = require_env("EMAIL_USERNAME")?;
        // Same mail account as the inbound mailbox; the SMTP host
        // usually differs from the IMAP host only in its prefix.
        let host = match std::env::var("EMAIL_SMTP_HOST") {
            Ok(h) if !h.trim().is_empty() => h.trim().to_string(),
            _ => require_env("EMAIL_IMAP_HOST")?.replace("imap", "smtp"),
        };
        Ok(Self {
            host,
            port: parse_env("EMAIL_SMTP_PORT", 587)?,
            password: SecretString::from(require_env("EMAIL_PASSWORD")?),
            from_address: env_or("EMAIL_FROM_ADDRESS", &username),
            username,
        })
    }
}

// ── Notifier adapter ────────────────────────────────────────────────

/// SMTP-backed [`Notifier`].
pub struct SmtpNotifier {
    config: Arc<SmtpConfig>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        let config = Arc::clone(&self.config);
        let to = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || send_blocking(&config, &to, &subject, &body))
            .await
            .map_err(|e| NotificationError::SendFailed {
                to: "unknown".into(),
                reason: format!("send task panicked: {e}"),
            })?
    }
}

fn send_blocking(
    config: &SmtpConfig,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<(), NotificationError> {
    let email = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| NotificationError::InvalidAddress {
                    address: config.from_address.clone(),
                    reason: format!("{e}"),
                })?,
        )
        .to(to.parse().map_err(|e| NotificationError::InvalidAddress {
            address: to.to_string(),
            reason: format!("{e}"),
        })?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| NotificationError::SendFailed {
            to: to.to_string(),
            reason: format!("failed to build email: {e}"),
        })?;

    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::relay(&config.host)
        .map_err(|e| NotificationError::SendFailed {
            to: to.to_string(),
            reason: format!("SMTP relay error: {e}"),
        })?
        .port(config.port)
        .credentials(creds)
        .build();

    transport
        .send(&email)
        .map_err(|e| NotificationError::SendFailed {
            to: to.to_string(),
            reason: format!("SMTP send failed: {e}"),
        })?;

    info!(to, subject, "Notification sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_recipient_address_is_rejected_before_any_io() {
        let notifier = SmtpNotifier::new(SmtpConfig {
            host: "smtp.test.example".into(),
            port: 587,
            username: "accounts@test.example".into(),
            password: SecretString::from("pw".to_string()),
            from_address: "accounts@test.example".into(),
        });

        let err = notifier
            .send("not an address", "Subject", "Body")
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::InvalidAddress { .. }));
    }
}
