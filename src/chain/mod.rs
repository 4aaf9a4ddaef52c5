//! Chain module - Soroban RPC access and bounded confirmation polling
//!
//! This module provides:
//! - The `ChainRpc` seam the orchestrator polls for transaction status
//! - A JSON-RPC client for a Soroban RPC endpoint
//! - The generic bounded-retry helper used for every confirmation wait

pub mod poll;

use crate::config::StellarConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Terminal and non-terminal transaction statuses reported by the RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet observable; retried within the polling budget.
    NotFound,
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::NotFound => "NOT_FOUND",
            TxStatus::Success => "SUCCESS",
            TxStatus::Failed => "FAILED",
        }
    }
}

/// Read-only chain RPC surface consumed by the orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_transaction_status(&self, tx_hash: &str) -> OrchestratorResult<TxStatus>;
}

/// JSON-RPC client for a Soroban RPC endpoint.
pub struct SorobanRpcClient {
    http: reqwest::Client,
    rpc_url: String,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'static str,
    params: GetTransactionParams<'a>,
}

#[derive(Serialize)]
struct GetTransactionParams<'a> {
    hash: &'a str,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<GetTransactionResult>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct GetTransactionResult {
    status: String,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl SorobanRpcClient {
    pub fn new(config: &StellarConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: config.soroban_rpc_url.clone(),
        }
    }
}

#[async_trait]
impl ChainRpc for SorobanRpcClient {
    async fn get_transaction_status(&self, tx_hash: &str) -> OrchestratorResult<TxStatus> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "getTransaction",
            params: GetTransactionParams { hash: tx_hash },
        };

        let response: RpcResponse = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::ChainRpc(e.to_string()))?
            .json()
            .await
            .map_err(|e| OrchestratorError::ChainRpc(format!("Malformed RPC response: {}", e)))?;

        if let Some(err) = response.error {
            return Err(OrchestratorError::ChainRpc(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        let result = response
            .result
            .ok_or_else(|| OrchestratorError::ChainRpc("RPC response missing result".to_string()))?;

        debug!(tx_hash, status = %result.status, "Chain transaction status");

        // Any terminal status other than success is treated as failed; only
        // NOT_FOUND stays inside the polling budget.
        let status = match result.status.as_str() {
            "NOT_FOUND" => TxStatus::NotFound,
            "SUCCESS" => TxStatus::Success,
            _ => TxStatus::Failed,
        };

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(TxStatus::NotFound.as_str(), "NOT_FOUND");
        assert_eq!(TxStatus::Success.as_str(), "SUCCESS");
        assert_eq!(TxStatus::Failed.as_str(), "FAILED");
    }
}
