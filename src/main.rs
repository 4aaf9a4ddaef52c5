//! Buffer Orchestrator - custodial wallet onboarding and vault provisioning
//!
//! This service onboards users onto custodial Stellar wallets, provisions
//! DeFindex-style yield vaults for them, and mediates deposit/withdraw
//! movements into those vaults, reconciling local state with polled on-chain
//! confirmation.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod adapters;
mod api;
mod chain;
mod config;
mod error;
mod metrics;
mod model;
mod onboarding;
mod store;
mod transactions;

use adapters::{HttpVaultFactory, HttpWalletProvider};
use api::AppState;
use chain::SorobanRpcClient;
use config::Settings;
use metrics::MetricsServer;
use onboarding::OnboardingOrchestrator;
use store::PgStore;
use transactions::TransactionLifecycle;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Buffer Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;

    // Initialize database connection
    let store = Arc::new(PgStore::new(&settings.database).await?);
    info!("Database connection established");

    store.run_migrations().await?;

    // External collaborators
    let wallets = Arc::new(HttpWalletProvider::new(&settings.wallet_provider));
    let vaults = Arc::new(HttpVaultFactory::new(
        &settings.vault,
        &settings.orchestrator,
    ));
    let rpc = Arc::new(SorobanRpcClient::new(&settings.stellar));

    // Core services
    let orchestrator = Arc::new(OnboardingOrchestrator::new(
        store.clone(),
        wallets,
        vaults.clone(),
        rpc,
        settings.vault.clone(),
        &settings.orchestrator,
    ));
    let lifecycle = Arc::new(TransactionLifecycle::new(
        store.clone(),
        vaults,
        settings.vault.clone(),
    ));
    info!("Orchestration services initialized");

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let state = AppState {
            orchestrator,
            lifecycle,
            store,
        };
        let host = settings.api.host.clone();
        let port = settings.api.port;
        async move {
            if let Err(e) = api::run_server(&host, port, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    info!(
        "Buffer Orchestrator is running on http://{}:{}",
        settings.api.host, settings.api.port
    );
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Buffer Orchestrator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,buffer_orchestrator=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
