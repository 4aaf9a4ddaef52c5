//! Transaction lifecycle manager
//!
//! Prepares unsigned deposit/withdraw transactions against the user's vault
//! (or the system-default buffer contract) and confirms user-signed
//! submissions. Signing always happens client-side by the wallet owner;
//! pre-signed server submission is rejected by policy.

use crate::adapters::VaultProtocol;
use crate::config::VaultConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;
use crate::model::{
    metadata_keys, BufferTransaction, NewTransaction, TransactionType, UserRecord,
};
use crate::store::Datastore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Payload returned by the prepare operations for client-side signing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPreparation {
    pub transaction_xdr: String,
    pub wallet_address: String,
    pub contract_id: String,
    pub transaction_id: Uuid,
}

/// Confirm request as received from the client.
///
/// The legacy shape carried a pre-signed XDR for server-side submission;
/// that path is permanently rejected.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub transaction_hash: Option<String>,
    pub signed_transaction_xdr: Option<String>,
}

pub struct TransactionLifecycle {
    store: Arc<dyn Datastore>,
    vaults: Arc<dyn VaultProtocol>,
    vault_config: VaultConfig,
}

impl TransactionLifecycle {
    pub fn new(
        store: Arc<dyn Datastore>,
        vaults: Arc<dyn VaultProtocol>,
        vault_config: VaultConfig,
    ) -> Self {
        Self {
            store,
            vaults,
            vault_config,
        }
    }

    pub async fn prepare_deposit(
        &self,
        user_id: &str,
        amount: &str,
    ) -> OrchestratorResult<TransactionPreparation> {
        self.prepare(TransactionType::Deposit, user_id, amount).await
    }

    pub async fn prepare_withdraw(
        &self,
        user_id: &str,
        shares: &str,
    ) -> OrchestratorResult<TransactionPreparation> {
        self.prepare(TransactionType::Withdraw, user_id, shares).await
    }

    async fn prepare(
        &self,
        kind: TransactionType,
        user_id: &str,
        amount_or_shares: &str,
    ) -> OrchestratorResult<TransactionPreparation> {
        validate_integer_amount(amount_or_shares)?;

        let record =
            self.store
                .get_user(user_id)
                .await?
                .ok_or_else(|| OrchestratorError::OnboardingIncomplete {
                    user_id: user_id.to_string(),
                    message: "user has not onboarded".to_string(),
                })?;

        let wallet_address = record.wallet_address.clone().ok_or_else(|| {
            OrchestratorError::OnboardingIncomplete {
                user_id: user_id.to_string(),
                message: "wallet not created".to_string(),
            }
        })?;

        let contract_id = self.resolve_contract(&record)?;

        let unsigned = match kind {
            TransactionType::Deposit => {
                self.vaults
                    .build_deposit_transaction(&contract_id, &wallet_address, amount_or_shares)
                    .await?
            }
            TransactionType::Withdraw => {
                self.vaults
                    .build_withdraw_transaction(&contract_id, &wallet_address, amount_or_shares)
                    .await?
            }
            other => {
                return Err(OrchestratorError::Internal(format!(
                    "Unsupported prepare kind {}",
                    other.as_str()
                )))
            }
        };

        let (amount, shares_delta) = match kind {
            TransactionType::Deposit => (Some(amount_or_shares.to_string()), None),
            _ => (None, Some(amount_or_shares.to_string())),
        };

        let transaction_id = self
            .store
            .create_transaction(NewTransaction {
                user_id: user_id.to_string(),
                transaction_type: kind,
                amount,
                shares_delta,
                metadata: serde_json::json!({
                    metadata_keys::CONTRACT_ID: contract_id,
                    metadata_keys::WALLET_ADDRESS: wallet_address,
                }),
            })
            .await?;
        metrics::record_tx_prepared(kind.as_str());

        info!(
            user_id,
            tx_id = %transaction_id,
            tx_type = kind.as_str(),
            contract = %contract_id,
            "Transaction prepared, awaiting user signature"
        );

        Ok(TransactionPreparation {
            transaction_xdr: unsigned.transaction_xdr,
            wallet_address,
            contract_id,
            transaction_id,
        })
    }

    /// Ownership-scoped confirmation of a user-signed submission.
    pub async fn confirm(
        &self,
        user_id: &str,
        tx_id: Uuid,
        request: &ConfirmRequest,
    ) -> OrchestratorResult<BufferTransaction> {
        // Checked before any side effect: the legacy pre-signed shape is a
        // policy rejection, not a malformed request.
        if request.signed_transaction_xdr.is_some() {
            return Err(OrchestratorError::UserSignatureRequired);
        }

        let tx_hash = request
            .transaction_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                OrchestratorError::Validation("transactionHash is required".to_string())
            })?;

        self.store.confirm_transaction(user_id, tx_id, tx_hash).await?;
        let record = self.store.get_transaction(user_id, tx_id).await?;
        metrics::record_tx_confirmed(record.transaction_type.as_str());

        info!(user_id, tx_id = %tx_id, "Transaction confirmed");
        Ok(record)
    }

    /// Per-user vault first, system-default buffer contract second.
    fn resolve_contract(&self, record: &UserRecord) -> OrchestratorResult<String> {
        record
            .vault_address
            .clone()
            .or_else(|| self.vault_config.default_buffer_contract.clone())
            .ok_or_else(|| OrchestratorError::ContractNotAvailable {
                user_id: record.user_id.clone(),
            })
    }
}

/// Amounts travel as stroop integers in strings; reject anything that is not
/// a positive integer before any side effect.
fn validate_integer_amount(value: &str) -> OrchestratorResult<()> {
    match value.parse::<i128>() {
        Ok(n) if n > 0 => Ok(()),
        _ => Err(OrchestratorError::InvalidAmount(value.to_string())),
    }
}
