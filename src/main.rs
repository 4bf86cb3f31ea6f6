use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use pin_autoconfirm::config::Config;
use pin_autoconfirm::confirmer::HttpConfirmer;
use pin_autoconfirm::imap_client::ImapMailbox;
use pin_autoconfirm::poller::Poller;
use pin_autoconfirm::server::{self, AppState};
use pin_autoconfirm::status::Status;

#[derive(Parser)]
#[command(name = "pin-autoconfirm")]
#[command(about = "Watches an IMAP mailbox and follows Pinterest confirmation links")]
#[command(version)]
struct Args {
    /// Dry-run mode: find confirmation links without following them or touching the mailbox
    #[arg(short, long)]
    dry_run: bool,

    /// Run a single poll cycle, print the report and exit (no HTTP server)
    #[arg(long)]
    once: bool,

    /// HTTP port for /health and /status (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Check the configuration without connecting
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load the .env file when there is one
    dotenv::dotenv().ok();

    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if args.dry_run {
        info!("🧪 Starting pin-autoconfirm in DRY-RUN mode");
    } else {
        info!("🚀 Starting pin-autoconfirm");
    }

    let mut config = Config::new().context("Unable to load configuration")?;
    config.poller.dry_run = args.dry_run;
    if let Some(port) = args.port {
        config.http.port = port;
    }

    if args.check_config {
        println!("✅ Configuration is valid!");
        println!("📧 IMAP: {}@{}:{}", config.imap.username, config.imap.server, config.imap.port);
        println!("🔑 Password: {}", mask_secret(&config.imap.password));
        println!("📂 Mailbox: {}", config.imap.mailbox);
        println!(
            "📁 Processed folder: {}",
            config.imap.processed_folder.as_deref().unwrap_or("(disabled)")
        );
        println!("🔍 Search: {}", pin_autoconfirm::imap_client::search_criteria(&config.imap));
        println!("⏱️  Poll interval: {:.1}s", config.poller.interval.as_secs_f64());
        println!("🌐 HTTP: {}", config.http.bind_addr());
        return Ok(());
    }

    let status = Status::new();
    let mailbox = ImapMailbox::new(config.imap.clone());
    let confirmer = HttpConfirmer::new(&config.confirm)?;
    let mut poller = Poller::new(mailbox, confirmer, status.clone(), config.poller.clone());

    if args.once {
        let result = poller.run_cycle().await;
        poller.close().await;

        let report = result.context("Poll cycle failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        info!("✅ Single cycle done, {} message(s) handled", report.results.len());
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let (poller_task, poller_handle) = poller.spawn(shutdown.clone());

    let bind_addr = config.http.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Unable to bind HTTP server on {}", bind_addr))?;

    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let state = AppState {
        status,
        poller: poller_handle,
    };
    if let Err(e) = server::serve(listener, state, shutdown.clone()).await {
        error!("❌ HTTP server error: {}", e);
    }

    // The server may also stop on its own, make sure the poller follows
    shutdown.cancel();
    if let Err(e) = poller_task.await {
        error!("❌ Poller task ended abnormally: {}", e);
    }

    info!("👋 pin-autoconfirm stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("⏹️  Shutdown requested");
    shutdown.cancel();
}

/// Fixed-width mask, reveals neither the secret nor its length
fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(empty)"
    } else {
        "********"
    }
}
