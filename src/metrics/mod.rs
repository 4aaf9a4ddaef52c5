//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Onboarding progress and failures
//! - Transaction preparation and confirmation
//! - Chain/vault confirmation polling outcomes

use crate::error::{OrchestratorError, OrchestratorResult};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Onboarding metrics
    pub static ref WALLETS_CREATED: CounterVec = register_counter_vec!(
        "buffer_wallets_created_total",
        "Total custodial wallets created",
        &[]
    ).unwrap();

    pub static ref VAULTS_ACTIVATED: CounterVec = register_counter_vec!(
        "buffer_vaults_activated_total",
        "Total vaults confirmed on-chain and marked READY",
        &[]
    ).unwrap();

    pub static ref ONBOARDING_FAILED: CounterVec = register_counter_vec!(
        "buffer_onboarding_failed_total",
        "Total onboarding attempts marked FAILED",
        &[]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_PREPARED: CounterVec = register_counter_vec!(
        "buffer_transactions_prepared_total",
        "Total transactions prepared by type",
        &["tx_type"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "buffer_transactions_confirmed_total",
        "Total transactions confirmed by type",
        &["tx_type"]
    ).unwrap();

    // Polling metrics
    pub static ref POLL_EXHAUSTED: CounterVec = register_counter_vec!(
        "buffer_poll_budget_exhausted_total",
        "Total confirmation polls that ran out of attempts",
        &["target"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "buffer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "buffer_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_wallet_created() {
    WALLETS_CREATED.with_label_values(&[]).inc();
}

pub fn record_vault_activated() {
    VAULTS_ACTIVATED.with_label_values(&[]).inc();
}

pub fn record_onboarding_failed() {
    ONBOARDING_FAILED.with_label_values(&[]).inc();
}

pub fn record_tx_prepared(tx_type: &str) {
    TX_PREPARED.with_label_values(&[tx_type]).inc();
}

pub fn record_tx_confirmed(tx_type: &str) {
    TX_CONFIRMED.with_label_values(&[tx_type]).inc();
}

pub fn record_poll_exhausted(target: &str) {
    POLL_EXHAUSTED.with_label_values(&[target]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
