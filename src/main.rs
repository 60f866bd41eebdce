use std::path::Path;
use std::sync::Arc;

use account_relay::config::AppConfig;
use account_relay::directory::{Directory, DirectoryConfig, RestDirectory};
use account_relay::ledger::{Ledger, LibSqlLedger};
use account_relay::mailbox::{ImapMailbox, Mailbox, MailboxConfig};
use account_relay::outbound::{Notifier, SmtpConfig, SmtpNotifier};
use account_relay::pipeline::dispatch::NotificationDispatcher;
use account_relay::pipeline::poller::MailboxPoller;
use account_relay::pipeline::provision::AccountProvisioner;
use account_relay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  Required: DOMAIN, ADMIN_ADDRESS, AUTHORIZED_SENDERS,");
            eprintln!("            EMAIL_IMAP_HOST, EMAIL_USERNAME, EMAIL_PASSWORD,");
            eprintln!("            DIRECTORY_API_URL, DIRECTORY_API_TOKEN");
            std::process::exit(1);
        }
    };

    eprintln!("account-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Domain: {}", config.domain);
    eprintln!("   Admin: {}", config.admin_address);
    eprintln!("   Authorized senders: {}", config.allow_list.len());
    eprintln!("   Org unit: {}", config.org_unit);
    eprintln!("   Ledger: {}", config.ledger_path);
    eprintln!("   Trigger: http://0.0.0.0:{}/run", config.http_port);

    let ledger: Arc<dyn Ledger> = Arc::new(
        LibSqlLedger::open(Path::new(&config.ledger_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to open ledger at {}: {e}", config.ledger_path);
                std::process::exit(1);
            }),
    );

    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(MailboxConfig::from_env()?));
    let directory: Arc<dyn Directory> = Arc::new(RestDirectory::new(DirectoryConfig::from_env()?)?);
    let notifier: Arc<dyn Notifier> = Arc::new(SmtpNotifier::new(SmtpConfig::from_env()?));

    let provisioner = AccountProvisioner::new(directory, &config);
    let dispatcher = NotificationDispatcher::new(notifier, &config);
    let poller = Arc::new(MailboxPoller::new(
        mailbox,
        ledger,
        config.allow_list.clone(),
        provisioner,
        dispatcher,
    ));

    let app = server::trigger_routes(poller, config.run_timeout);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!(port = config.http_port, "Trigger server started");
    axum::serve(listener, app).await?;

    Ok(())
}
