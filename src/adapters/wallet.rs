//! HTTP client for the wallet-custody provider

use super::{WalletInfo, WalletProvider};
use crate::config::WalletProviderConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

pub struct HttpWalletProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct CreateWalletBody<'a> {
    email: &'a str,
}

impl HttpWalletProvider {
    pub fn new(config: &WalletProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl WalletProvider for HttpWalletProvider {
    async fn create_or_get_wallet(&self, email: &str) -> OrchestratorResult<WalletInfo> {
        let url = format!("{}/wallets", self.base_url);

        let mut request = self.http.post(&url).json(&CreateWalletBody { email });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OrchestratorError::WalletProvider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OrchestratorError::WalletProvider(format!(
                "Custody provider returned {}",
                response.status()
            )));
        }

        let wallet: WalletInfo = response
            .json()
            .await
            .map_err(|e| {
                OrchestratorError::WalletProvider(format!("Malformed wallet response: {}", e))
            })?;

        debug!(address = %wallet.address, chain = %wallet.chain, "Custodial wallet resolved");
        Ok(wallet)
    }
}
