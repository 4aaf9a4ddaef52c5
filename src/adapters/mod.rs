//! External collaborator adapters
//!
//! The orchestrator only sees these traits; concrete HTTP clients validate
//! the remote payloads into the typed structs below once, at the boundary.

pub mod vault;
pub mod wallet;

pub use vault::HttpVaultFactory;
pub use wallet::HttpWalletProvider;

use crate::error::OrchestratorResult;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Custodial wallet returned by the custody provider.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletInfo {
    pub address: String,
    pub chain: String,
}

/// Request for a new vault keyed to a wallet address.
#[derive(Debug, Clone, Serialize)]
pub struct CreateVaultRequest {
    pub user_address: String,
    pub asset_address: String,
    pub strategy_address: String,
}

/// Unsigned vault-creation transaction plus the address the vault will have
/// once that transaction is confirmed. The address is not live yet.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultCreation {
    pub transaction_xdr: String,
    pub predicted_vault_address: String,
}

/// Unsigned transaction payload handed back for client-side signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub transaction_xdr: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Create a custodial wallet for the email identity, or return the
    /// existing one. Must be idempotent on the provider side.
    async fn create_or_get_wallet(&self, email: &str) -> OrchestratorResult<WalletInfo>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VaultProtocol: Send + Sync {
    async fn create_vault(&self, request: CreateVaultRequest) -> OrchestratorResult<VaultCreation>;

    /// Bounded wait until the vault at `vault_address` is observably live.
    /// Returns false when the internal budget is exhausted.
    async fn wait_for_vault_confirmation(&self, vault_address: &str) -> OrchestratorResult<bool>;

    async fn build_deposit_transaction(
        &self,
        contract_id: &str,
        from_address: &str,
        amount: &str,
    ) -> OrchestratorResult<UnsignedTransaction>;

    async fn build_withdraw_transaction(
        &self,
        contract_id: &str,
        from_address: &str,
        shares: &str,
    ) -> OrchestratorResult<UnsignedTransaction>;
}
