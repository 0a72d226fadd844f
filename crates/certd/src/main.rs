//! certd - main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use certd::acme::AcmeClient;
use certd::dns::TxtPrecheck;
use certd::http::{self, AppState};
use certd::service::{AccountService, OrderService};
use certd::store::{AccountRepo, MySqlStore, OrderRepo};
use certd::Reconciler;
use certd_config::Config;

/// certd - ACME v2 certificate management daemon
#[derive(Parser, Debug)]
#[command(name = "certd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        alias = "configPath",
        env = "CERTD_CONFIG"
    )]
    config: String,

    /// Validate configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_file(&cli.config).context("failed to load configuration")?;

    if cli.test {
        info!(path = %cli.config, "Configuration is valid");
        return Ok(());
    }

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let store = Arc::new(
        MySqlStore::connect(&config.data.database)
            .await
            .context("failed to connect to database")?,
    );
    let accounts: Arc<dyn AccountRepo> = store.clone();
    let orders: Arc<dyn OrderRepo> = store;

    let acme = AcmeClient::new(config.acme.directory_url.clone())
        .context("failed to build ACME client")?;
    let precheck =
        Arc::new(TxtPrecheck::new(&config.dns.dns).context("failed to build DNS pre-checker")?);

    let account_service = Arc::new(AccountService::new(acme.clone(), accounts.clone()));
    let order_service = Arc::new(OrderService::new(acme, accounts, orders, precheck));

    let shutdown = CancellationToken::new();

    let reconciler = Reconciler::new(order_service.clone(), config.reconciler.interval());
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown.clone()));

    let app = http::router(Arc::new(AppState {
        accounts: account_service,
        orders: order_service,
    }));

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;

    info!(
        listen = %config.server.listen,
        directory_url = %config.acme.directory_url,
        "certd started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("command API server failed")?;

    // The signal handler has already cancelled the token; wait for the
    // reconciler to finish its current order.
    if let Err(e) = reconciler_handle.await {
        error!(error = %e, "Reconciler task panicked");
    }

    info!("certd stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
