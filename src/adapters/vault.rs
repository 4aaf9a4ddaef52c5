//! HTTP client for the vault-factory protocol
//!
//! Covers vault creation, vault liveness checks, and building unsigned
//! deposit/withdraw transactions against a buffer contract.

use super::{CreateVaultRequest, UnsignedTransaction, VaultCreation, VaultProtocol};
use crate::chain::poll::poll_until;
use crate::config::{OrchestratorConfig, VaultConfig};
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, warn};

pub struct HttpVaultFactory {
    http: reqwest::Client,
    factory_url: String,
    liveness_attempts: u32,
    liveness_interval: Duration,
}

#[derive(Deserialize)]
struct VaultStatusResponse {
    live: bool,
}

#[derive(Serialize)]
struct BuildTransactionBody<'a> {
    contract_id: &'a str,
    from: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shares: Option<&'a str>,
}

impl HttpVaultFactory {
    pub fn new(vault_config: &VaultConfig, orchestrator_config: &OrchestratorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            factory_url: vault_config.factory_url.trim_end_matches('/').to_string(),
            liveness_attempts: orchestrator_config.vault_poll_attempts,
            liveness_interval: Duration::from_millis(orchestrator_config.vault_poll_interval_ms),
        }
    }

    /// One liveness probe. A 404 means the vault is not observable yet.
    async fn check_vault_live(&self, vault_address: &str) -> OrchestratorResult<bool> {
        let url = format!("{}/vaults/{}", self.factory_url, vault_address);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::VaultProtocol(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(OrchestratorError::VaultProtocol(format!(
                "Vault factory returned {}",
                response.status()
            )));
        }

        let status: VaultStatusResponse = response.json().await.map_err(|e| {
            OrchestratorError::VaultProtocol(format!("Malformed vault status: {}", e))
        })?;

        Ok(status.live)
    }

    async fn build_transaction(
        &self,
        endpoint: &str,
        body: BuildTransactionBody<'_>,
    ) -> OrchestratorResult<UnsignedTransaction> {
        let url = format!("{}/transactions/{}", self.factory_url, endpoint);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::VaultProtocol(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::VaultProtocol(format!(
                "Vault factory returned {} building {} transaction",
                response.status(),
                endpoint
            )));
        }

        response.json().await.map_err(|e| {
            OrchestratorError::VaultProtocol(format!("Malformed transaction payload: {}", e))
        })
    }
}

#[async_trait]
impl VaultProtocol for HttpVaultFactory {
    async fn create_vault(&self, request: CreateVaultRequest) -> OrchestratorResult<VaultCreation> {
        let url = format!("{}/vaults", self.factory_url);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::VaultProtocol(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::VaultProtocol(format!(
                "Vault factory returned {}",
                response.status()
            )));
        }

        let creation: VaultCreation = response.json().await.map_err(|e| {
            OrchestratorError::VaultProtocol(format!("Malformed vault creation response: {}", e))
        })?;

        debug!(
            predicted = %creation.predicted_vault_address,
            "Vault creation transaction built"
        );
        Ok(creation)
    }

    async fn wait_for_vault_confirmation(&self, vault_address: &str) -> OrchestratorResult<bool> {
        let outcome = poll_until(
            self.liveness_attempts,
            self.liveness_interval,
            || async {
                match self.check_vault_live(vault_address).await {
                    Ok(live) => Ok(live),
                    Err(e) => {
                        warn!(vault_address, error = %e, "Vault liveness probe failed");
                        Err(e)
                    }
                }
            },
            // Transport errors count as still-pending so one blip does not
            // abort the remaining attempt budget.
            |result| matches!(result, Ok(false) | Err(_)),
        )
        .await;

        match outcome {
            Some(Ok(live)) => Ok(live),
            Some(Err(e)) => Err(e),
            None => {
                warn!(vault_address, "Vault liveness polling budget exhausted");
                Ok(false)
            }
        }
    }

    async fn build_deposit_transaction(
        &self,
        contract_id: &str,
        from_address: &str,
        amount: &str,
    ) -> OrchestratorResult<UnsignedTransaction> {
        self.build_transaction(
            "deposit",
            BuildTransactionBody {
                contract_id,
                from: from_address,
                amount: Some(amount),
                shares: None,
            },
        )
        .await
    }

    async fn build_withdraw_transaction(
        &self,
        contract_id: &str,
        from_address: &str,
        shares: &str,
    ) -> OrchestratorResult<UnsignedTransaction> {
        self.build_transaction(
            "withdraw",
            BuildTransactionBody {
                contract_id,
                from: from_address,
                amount: None,
                shares: Some(shares),
            },
        )
        .await
    }
}
