//! vigiad - watches a GLPI portal and emails alerts for known issues.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigia_core::knowledge::KnowledgeBase;
use vigia_core::ledger::SentLedger;
use vigia_core::matcher::Matcher;

use vigiad::config::{Config, Credentials};
use vigiad::glpi::GlpiClient;
use vigiad::mailer::SmtpNotifier;
use vigiad::poller::Poller;

#[derive(Parser, Debug)]
#[command(
    name = "vigiad",
    about = "Watches a GLPI portal and emails alerts for known issues",
    version
)]
struct Args {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory (knowledge base, ledger, images).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run a single scan cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials may live in a .env next to the binary; absence is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("vigiad v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    let credentials = Credentials::from_env()
        .context("required credentials missing, see .env.example")?;

    let kb = KnowledgeBase::load(&config.knowledge_path()).with_context(|| {
        format!(
            "cannot load knowledge base from {}",
            config.knowledge_path().display()
        )
    })?;
    let matcher = Matcher::compile(&kb).context("cannot compile knowledge base keywords")?;
    info!(
        "Knowledge base loaded: {} entries across {} systems",
        kb.len(),
        kb.systems.len()
    );

    let ledger = SentLedger::load(config.ledger_path()).with_context(|| {
        format!("cannot load sent ledger from {}", config.ledger_path().display())
    })?;
    info!("{} tickets already notified", ledger.len());

    let source = GlpiClient::new(
        &config.glpi,
        &credentials,
        config.http_timeout(),
        config.image_dir(),
    );
    let notifier =
        SmtpNotifier::new(&config.mail, &credentials).context("cannot set up the mailer")?;
    let mut poller = Poller::new(source, notifier, matcher, ledger, config.poll_interval());

    if args.once {
        match poller.run_once().await {
            Some(summary) => {
                info!(
                    "Single cycle finished: {} checked, {} sent",
                    summary.tickets_checked, summary.sent
                );
                Ok(())
            }
            None => anyhow::bail!("could not establish a portal session"),
        }
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
        poller.run(shutdown_rx).await
    }
}
