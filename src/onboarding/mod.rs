//! Onboarding orchestrator
//!
//! Drives a user from "no wallet" through wallet creation, vault
//! preparation, and on-chain vault confirmation to READY. Steps are not
//! atomic across the custody provider, the chain, and the vault factory, so
//! every operation re-derives its forward step from persisted state and is
//! safe to retry.

use crate::adapters::{CreateVaultRequest, VaultProtocol, WalletProvider};
use crate::chain::poll::poll_until;
use crate::chain::{ChainRpc, TxStatus};
use crate::config::{OrchestratorConfig, VaultConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;
use crate::model::{
    metadata_keys, NewTransaction, OnboardingStatus, TransactionStatus, TransactionType, UserRecord,
};
use crate::store::{Datastore, StatusPatch};

use serde::Serialize;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Payload returned by `prepare_vault_creation` for client-side signing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultPreparation {
    pub transaction_xdr: String,
    pub wallet_address: String,
    pub transaction_id: Uuid,
    pub predicted_vault_address: String,
}

/// Result of a confirmed vault creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultActivation {
    pub vault_address: String,
    pub status: OnboardingStatus,
}

pub struct OnboardingOrchestrator {
    store: Arc<dyn Datastore>,
    wallets: Arc<dyn WalletProvider>,
    vaults: Arc<dyn VaultProtocol>,
    rpc: Arc<dyn ChainRpc>,
    vault_config: VaultConfig,
    chain_poll_attempts: u32,
    chain_poll_interval: Duration,
}

impl OnboardingOrchestrator {
    pub fn new(
        store: Arc<dyn Datastore>,
        wallets: Arc<dyn WalletProvider>,
        vaults: Arc<dyn VaultProtocol>,
        rpc: Arc<dyn ChainRpc>,
        vault_config: VaultConfig,
        orchestrator_config: &OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            wallets,
            vaults,
            rpc,
            vault_config,
            chain_poll_attempts: orchestrator_config.chain_poll_attempts,
            chain_poll_interval: Duration::from_millis(orchestrator_config.chain_poll_interval_ms),
        }
    }

    /// Idempotent onboarding entry point. Re-invoking after a failure
    /// resumes from whatever persisted progress exists.
    pub async fn onboard_user(&self, user_id: &str, email: &str) -> OrchestratorResult<UserRecord> {
        match self.drive_onboarding(user_id, email).await {
            Ok(record) => Ok(record),
            Err(err) => {
                // Best-effort FAILED mark; a secondary failure here must not
                // mask the original error.
                if let Err(mark_err) = self
                    .store
                    .update_onboarding_status(user_id, OnboardingStatus::Failed, StatusPatch::default())
                    .await
                {
                    warn!(user_id, error = %mark_err, "Could not mark onboarding FAILED");
                }
                metrics::record_onboarding_failed();
                Err(err)
            }
        }
    }

    async fn drive_onboarding(&self, user_id: &str, email: &str) -> OrchestratorResult<UserRecord> {
        let record = self.store.upsert_user(user_id, email).await?;

        // Once READY nothing is ever re-created.
        if record.onboarding_status == OnboardingStatus::Ready {
            return Ok(record);
        }

        if record.wallet_address.is_none() {
            let wallet = self.wallets.create_or_get_wallet(email).await?;
            info!(user_id, address = %wallet.address, "Custodial wallet created");
            self.store
                .update_onboarding_status(
                    user_id,
                    OnboardingStatus::WalletCreated,
                    StatusPatch {
                        wallet_address: Some(wallet.address),
                        vault_address: None,
                    },
                )
                .await?;
            metrics::record_wallet_created();
        } else if record.vault_address.is_none()
            && matches!(
                record.onboarding_status,
                OnboardingStatus::NotStarted
                    | OnboardingStatus::Pending
                    | OnboardingStatus::Failed
            )
        {
            // Wallet already exists but the status lagged behind a partial
            // or failed run; bring it forward without regressing.
            self.store
                .update_onboarding_status(
                    user_id,
                    OnboardingStatus::WalletCreated,
                    StatusPatch::default(),
                )
                .await?;
        }

        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| OrchestratorError::UserNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Current persisted state, or the virtual NOT_STARTED view.
    pub async fn get_status(&self, user_id: &str) -> OrchestratorResult<UserRecord> {
        Ok(self
            .store
            .get_user(user_id)
            .await?
            .unwrap_or_else(|| UserRecord::not_started(user_id)))
    }

    /// Build the unsigned vault-creation transaction and record the LOCK
    /// bookkeeping entry. The conditional status advance serializes
    /// concurrent calls for the same user.
    pub async fn prepare_vault_creation(
        &self,
        user_id: &str,
    ) -> OrchestratorResult<VaultPreparation> {
        let record =
            self.store
                .get_user(user_id)
                .await?
                .ok_or_else(|| OrchestratorError::UserNotFound {
                    user_id: user_id.to_string(),
                })?;

        let wallet_address =
            record
                .wallet_address
                .clone()
                .ok_or_else(|| OrchestratorError::WalletNotReady {
                    user_id: user_id.to_string(),
                })?;

        if record.vault_address.is_some() && record.onboarding_status == OnboardingStatus::Ready {
            return Err(OrchestratorError::VaultAlreadyActive {
                user_id: user_id.to_string(),
            });
        }

        let advanced = self
            .store
            .advance_onboarding_status(
                user_id,
                record.onboarding_status,
                OnboardingStatus::VaultPreparing,
            )
            .await?;
        if !advanced {
            return Err(OrchestratorError::OnboardingInProgress {
                user_id: user_id.to_string(),
            });
        }

        let creation = self
            .vaults
            .create_vault(CreateVaultRequest {
                user_address: wallet_address.clone(),
                asset_address: self.vault_config.asset_address.clone(),
                strategy_address: self.vault_config.strategy_address.clone(),
            })
            .await?;

        let metadata = serde_json::json!({
            metadata_keys::PREDICTED_VAULT_ADDRESS: creation.predicted_vault_address,
            metadata_keys::CONTRACT_ID: creation.predicted_vault_address,
            metadata_keys::WALLET_ADDRESS: wallet_address,
        });

        let transaction_id = self
            .store
            .create_transaction(NewTransaction {
                user_id: user_id.to_string(),
                transaction_type: TransactionType::Lock,
                amount: None,
                shares_delta: None,
                metadata,
            })
            .await?;

        self.store
            .update_onboarding_status(
                user_id,
                OnboardingStatus::VaultPendingSignature,
                StatusPatch::default(),
            )
            .await?;

        info!(
            user_id,
            predicted = %creation.predicted_vault_address,
            tx_id = %transaction_id,
            "Vault creation prepared, awaiting user signature"
        );

        Ok(VaultPreparation {
            transaction_xdr: creation.transaction_xdr,
            wallet_address,
            transaction_id,
            predicted_vault_address: creation.predicted_vault_address,
        })
    }

    /// Record the user-signed submission, then reconcile with the chain:
    /// poll the RPC until the transaction settles and wait for the predicted
    /// vault address to be observably live before marking READY.
    pub async fn submit_vault_creation(
        &self,
        user_id: &str,
        tx_id: Uuid,
        tx_hash: &str,
    ) -> OrchestratorResult<VaultActivation> {
        if let Err(err) = self.store.confirm_transaction(user_id, tx_id, tx_hash).await {
            match err {
                OrchestratorError::TransactionNotFound { .. } => {
                    // The conditional update only matches PENDING rows. A
                    // prior submit may have confirmed the record and then
                    // failed during chain or liveness polling; a re-submit
                    // carrying the same hash resumes from there.
                    let record = self.store.get_transaction(user_id, tx_id).await?;
                    let already_confirmed = record.status == TransactionStatus::Confirmed
                        && record.stellar_tx_hash.as_deref() == Some(tx_hash);
                    if !already_confirmed {
                        return Err(OrchestratorError::TransactionNotFound {
                            user_id: user_id.to_string(),
                            tx_id: tx_id.to_string(),
                        });
                    }
                }
                other => return Err(other),
            }
        }

        let lock_record = self.store.get_transaction(user_id, tx_id).await?;
        let predicted_vault_address = lock_record
            .metadata
            .get(metadata_keys::PREDICTED_VAULT_ADDRESS)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::VaultSubmitInvalidState {
                user_id: user_id.to_string(),
            })?;

        let outcome = poll_until(
            self.chain_poll_attempts,
            self.chain_poll_interval,
            || self.rpc.get_transaction_status(tx_hash),
            |result| matches!(result, Ok(TxStatus::NotFound)),
        )
        .await;

        match outcome {
            Some(Ok(TxStatus::Success)) => {}
            Some(Ok(status)) => {
                return Err(OrchestratorError::ChainTransactionFailed {
                    tx_hash: tx_hash.to_string(),
                    status: status.as_str().to_string(),
                });
            }
            Some(Err(e)) => return Err(e),
            None => {
                metrics::record_poll_exhausted("chain_transaction");
                return Err(OrchestratorError::VaultNotConfirmed {
                    vault_address: predicted_vault_address,
                });
            }
        }

        let live = self
            .vaults
            .wait_for_vault_confirmation(&predicted_vault_address)
            .await?;
        if !live {
            metrics::record_poll_exhausted("vault_liveness");
            return Err(OrchestratorError::VaultNotConfirmed {
                vault_address: predicted_vault_address,
            });
        }

        // vault_address and READY land in one persisted update.
        self.store
            .update_onboarding_status(
                user_id,
                OnboardingStatus::Ready,
                StatusPatch {
                    wallet_address: None,
                    vault_address: Some(predicted_vault_address.clone()),
                },
            )
            .await?;
        metrics::record_vault_activated();

        info!(user_id, vault = %predicted_vault_address, "Vault confirmed, user READY");

        Ok(VaultActivation {
            vault_address: predicted_vault_address,
            status: OnboardingStatus::Ready,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockVaultProtocol, MockWalletProvider, VaultCreation, WalletInfo};
    use crate::chain::MockChainRpc;
    use crate::store::MockDatastore;
    use crate::model::{BufferTransaction, TransactionStatus};
    use chrono::Utc;

    fn vault_config() -> VaultConfig {
        VaultConfig {
            factory_url: "https://factory.example.com".into(),
            asset_address: "CASSET".into(),
            strategy_address: "CSTRAT".into(),
            default_buffer_contract: Some("CBUFFER".into()),
        }
    }

    fn orchestrator_config() -> OrchestratorConfig {
        OrchestratorConfig {
            chain_poll_attempts: 10,
            chain_poll_interval_ms: 2000,
            vault_poll_attempts: 15,
            vault_poll_interval_ms: 2000,
        }
    }

    fn user(status: OnboardingStatus, wallet: Option<&str>, vault: Option<&str>) -> UserRecord {
        UserRecord {
            user_id: "U1".into(),
            email: "a@x.com".into(),
            wallet_address: wallet.map(str::to_string),
            vault_address: vault.map(str::to_string),
            onboarding_status: status,
            updated_at: Utc::now(),
        }
    }

    fn lock_record(id: Uuid, metadata: serde_json::Value) -> BufferTransaction {
        BufferTransaction {
            id,
            user_id: "U1".into(),
            transaction_type: TransactionType::Lock,
            amount: None,
            shares_delta: None,
            status: TransactionStatus::Confirmed,
            metadata,
            stellar_tx_hash: Some("0xHASH".into()),
            created_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
        }
    }

    fn orchestrator(
        store: MockDatastore,
        wallets: MockWalletProvider,
        vaults: MockVaultProtocol,
        rpc: MockChainRpc,
    ) -> OnboardingOrchestrator {
        OnboardingOrchestrator::new(
            Arc::new(store),
            Arc::new(wallets),
            Arc::new(vaults),
            Arc::new(rpc),
            vault_config(),
            &orchestrator_config(),
        )
    }

    #[tokio::test]
    async fn onboard_is_idempotent_once_ready() {
        let mut store = MockDatastore::new();
        store
            .expect_upsert_user()
            .times(2)
            .returning(|_, _| Ok(user(OnboardingStatus::Ready, Some("GWALLET"), Some("CVAULT"))));
        // No wallet provider expectation: a second wallet creation would panic.
        let wallets = MockWalletProvider::new();
        let orchestrator = orchestrator(store, wallets, MockVaultProtocol::new(), MockChainRpc::new());

        let first = orchestrator.onboard_user("U1", "a@x.com").await.unwrap();
        let second = orchestrator.onboard_user("U1", "a@x.com").await.unwrap();

        assert_eq!(first.onboarding_status, OnboardingStatus::Ready);
        assert_eq!(second.wallet_address.as_deref(), Some("GWALLET"));
        assert_eq!(second.vault_address.as_deref(), Some("CVAULT"));
    }

    #[tokio::test]
    async fn onboard_creates_wallet_and_advances_status() {
        let mut store = MockDatastore::new();
        store
            .expect_upsert_user()
            .returning(|_, _| Ok(user(OnboardingStatus::Pending, None, None)));
        store
            .expect_update_onboarding_status()
            .withf(|uid, status, patch| {
                uid == "U1"
                    && *status == OnboardingStatus::WalletCreated
                    && patch.wallet_address.as_deref() == Some("GWALLET")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_get_user()
            .returning(|_| Ok(Some(user(OnboardingStatus::WalletCreated, Some("GWALLET"), None))));

        let mut wallets = MockWalletProvider::new();
        wallets.expect_create_or_get_wallet().times(1).returning(|_| {
            Ok(WalletInfo {
                address: "GWALLET".into(),
                chain: "stellar".into(),
            })
        });

        let orchestrator = orchestrator(store, wallets, MockVaultProtocol::new(), MockChainRpc::new());
        let record = orchestrator.onboard_user("U1", "a@x.com").await.unwrap();

        assert_eq!(record.onboarding_status, OnboardingStatus::WalletCreated);
        assert_eq!(record.wallet_address.as_deref(), Some("GWALLET"));
    }

    #[tokio::test]
    async fn onboard_advances_lagging_status_without_wallet_call() {
        let mut store = MockDatastore::new();
        store
            .expect_upsert_user()
            .returning(|_, _| Ok(user(OnboardingStatus::Pending, Some("GWALLET"), None)));
        store
            .expect_update_onboarding_status()
            .withf(|_, status, patch| {
                *status == OnboardingStatus::WalletCreated && patch.wallet_address.is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_get_user()
            .returning(|_| Ok(Some(user(OnboardingStatus::WalletCreated, Some("GWALLET"), None))));

        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let record = orchestrator.onboard_user("U1", "a@x.com").await.unwrap();
        assert_eq!(record.onboarding_status, OnboardingStatus::WalletCreated);
    }

    #[tokio::test]
    async fn onboard_recovers_failed_record_with_persisted_wallet() {
        let mut store = MockDatastore::new();
        store
            .expect_upsert_user()
            .returning(|_, _| Ok(user(OnboardingStatus::Failed, Some("GWALLET"), None)));
        store
            .expect_update_onboarding_status()
            .withf(|_, status, patch| {
                *status == OnboardingStatus::WalletCreated && patch.wallet_address.is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_get_user()
            .returning(|_| Ok(Some(user(OnboardingStatus::WalletCreated, Some("GWALLET"), None))));

        // No wallet provider expectation: the persisted wallet must be reused.
        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let record = orchestrator.onboard_user("U1", "a@x.com").await.unwrap();
        assert_eq!(record.onboarding_status, OnboardingStatus::WalletCreated);
    }

    #[tokio::test]
    async fn onboard_failure_marks_failed_but_raises_original_error() {
        let mut store = MockDatastore::new();
        store
            .expect_upsert_user()
            .returning(|_, _| Ok(user(OnboardingStatus::Pending, None, None)));
        store
            .expect_update_onboarding_status()
            .withf(|_, status, _| *status == OnboardingStatus::Failed)
            .times(1)
            // The FAILED mark itself failing must not mask the original error.
            .returning(|_, _, _| Err(OrchestratorError::Database(sqlx::Error::PoolClosed)));

        let mut wallets = MockWalletProvider::new();
        wallets
            .expect_create_or_get_wallet()
            .returning(|_| Err(OrchestratorError::WalletProvider("custody down".into())));

        let orchestrator = orchestrator(store, wallets, MockVaultProtocol::new(), MockChainRpc::new());
        let err = orchestrator.onboard_user("U1", "a@x.com").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::WalletProvider(_)));
    }

    #[tokio::test]
    async fn get_status_reports_virtual_not_started() {
        let mut store = MockDatastore::new();
        store.expect_get_user().returning(|_| Ok(None));

        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let record = orchestrator.get_status("U404").await.unwrap();
        assert_eq!(record.onboarding_status, OnboardingStatus::NotStarted);
        assert_eq!(record.user_id, "U404");
    }

    #[tokio::test]
    async fn prepare_without_wallet_fails_and_creates_no_record() {
        let mut store = MockDatastore::new();
        store
            .expect_get_user()
            .returning(|_| Ok(Some(user(OnboardingStatus::Pending, None, None))));
        // No create_transaction expectation: any record creation would panic.

        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let err = orchestrator.prepare_vault_creation("U1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::WalletNotReady { .. }));
    }

    #[tokio::test]
    async fn prepare_with_active_vault_fails() {
        let mut store = MockDatastore::new();
        store.expect_get_user().returning(|_| {
            Ok(Some(user(OnboardingStatus::Ready, Some("GWALLET"), Some("CVAULT"))))
        });

        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let err = orchestrator.prepare_vault_creation("U1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::VaultAlreadyActive { .. }));
    }

    #[tokio::test]
    async fn prepare_lost_race_reports_in_progress() {
        let mut store = MockDatastore::new();
        store
            .expect_get_user()
            .returning(|_| Ok(Some(user(OnboardingStatus::WalletCreated, Some("GWALLET"), None))));
        store
            .expect_advance_onboarding_status()
            .returning(|_, _, _| Ok(false));

        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let err = orchestrator.prepare_vault_creation("U1").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::OnboardingInProgress { .. }));
    }

    #[tokio::test]
    async fn prepare_builds_lock_record_with_predicted_address() {
        let mut store = MockDatastore::new();
        store
            .expect_get_user()
            .returning(|_| Ok(Some(user(OnboardingStatus::WalletCreated, Some("GWALLET"), None))));
        store
            .expect_advance_onboarding_status()
            .withf(|_, expected, next| {
                *expected == OnboardingStatus::WalletCreated
                    && *next == OnboardingStatus::VaultPreparing
            })
            .returning(|_, _, _| Ok(true));
        store
            .expect_create_transaction()
            .withf(|input| {
                input.transaction_type == TransactionType::Lock
                    && input.metadata[metadata_keys::PREDICTED_VAULT_ADDRESS] == "CVAULT1"
            })
            .times(1)
            .returning(|_| Ok(Uuid::nil()));
        store
            .expect_update_onboarding_status()
            .withf(|_, status, _| *status == OnboardingStatus::VaultPendingSignature)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut vaults = MockVaultProtocol::new();
        vaults.expect_create_vault().times(1).returning(|req| {
            assert_eq!(req.user_address, "GWALLET");
            assert_eq!(req.asset_address, "CASSET");
            Ok(VaultCreation {
                transaction_xdr: "XDR1".into(),
                predicted_vault_address: "CVAULT1".into(),
            })
        });

        let orchestrator = orchestrator(store, MockWalletProvider::new(), vaults, MockChainRpc::new());
        let preparation = orchestrator.prepare_vault_creation("U1").await.unwrap();

        assert_eq!(preparation.transaction_xdr, "XDR1");
        assert_eq!(preparation.wallet_address, "GWALLET");
        assert_eq!(preparation.predicted_vault_address, "CVAULT1");
    }

    fn submit_store(tx_id: Uuid, with_predicted: bool) -> MockDatastore {
        let mut store = MockDatastore::new();
        store
            .expect_confirm_transaction()
            .withf(move |uid, id, hash| uid == "U1" && *id == tx_id && hash == "0xHASH")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let metadata = if with_predicted {
            serde_json::json!({ metadata_keys::PREDICTED_VAULT_ADDRESS: "CVAULT1" })
        } else {
            serde_json::json!({})
        };
        store
            .expect_get_transaction()
            .returning(move |_, id| Ok(lock_record(id, metadata.clone())));
        store
    }

    #[tokio::test(start_paused = true)]
    async fn submit_succeeds_when_chain_settles_within_budget() {
        let tx_id = Uuid::new_v4();
        let mut store = submit_store(tx_id, true);
        store
            .expect_update_onboarding_status()
            .withf(|_, status, patch| {
                *status == OnboardingStatus::Ready
                    && patch.vault_address.as_deref() == Some("CVAULT1")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        // NOT_FOUND nine times, then SUCCESS on the tenth attempt.
        let mut rpc = MockChainRpc::new();
        let mut calls = 0u32;
        rpc.expect_get_transaction_status()
            .times(10)
            .returning(move |_| {
                calls += 1;
                if calls < 10 {
                    Ok(TxStatus::NotFound)
                } else {
                    Ok(TxStatus::Success)
                }
            });

        let mut vaults = MockVaultProtocol::new();
        vaults
            .expect_wait_for_vault_confirmation()
            .withf(|address| address == "CVAULT1")
            .times(1)
            .returning(|_| Ok(true));

        let orchestrator = orchestrator(store, MockWalletProvider::new(), vaults, rpc);
        let activation = orchestrator
            .submit_vault_creation("U1", tx_id, "0xHASH")
            .await
            .unwrap();

        assert_eq!(activation.vault_address, "CVAULT1");
        assert_eq!(activation.status, OnboardingStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_fails_after_ten_not_found_responses() {
        let tx_id = Uuid::new_v4();
        let store = submit_store(tx_id, true);

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_transaction_status()
            .times(10)
            .returning(|_| Ok(TxStatus::NotFound));

        let orchestrator =
            orchestrator(store, MockWalletProvider::new(), MockVaultProtocol::new(), rpc);
        let err = orchestrator
            .submit_vault_creation("U1", tx_id, "0xHASH")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::VaultNotConfirmed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_treats_terminal_failure_as_fatal() {
        let tx_id = Uuid::new_v4();
        let store = submit_store(tx_id, true);

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_transaction_status()
            .times(1)
            .returning(|_| Ok(TxStatus::Failed));

        let orchestrator =
            orchestrator(store, MockWalletProvider::new(), MockVaultProtocol::new(), rpc);
        let err = orchestrator
            .submit_vault_creation("U1", tx_id, "0xHASH")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ChainTransactionFailed { .. }));
    }

    #[tokio::test]
    async fn submit_without_predicted_address_is_invalid_state() {
        let tx_id = Uuid::new_v4();
        let store = submit_store(tx_id, false);

        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let err = orchestrator
            .submit_vault_creation("U1", tx_id, "0xHASH")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::VaultSubmitInvalidState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_can_be_retried_after_poll_exhaustion() {
        let tx_id = Uuid::new_v4();

        let mut store = MockDatastore::new();
        // The store's conditional update matches only PENDING rows, so the
        // second submit observes zero rows and reports not-found.
        let mut confirms = 0u32;
        store
            .expect_confirm_transaction()
            .times(2)
            .returning(move |uid, id, _| {
                confirms += 1;
                if confirms == 1 {
                    Ok(())
                } else {
                    Err(OrchestratorError::TransactionNotFound {
                        user_id: uid.to_string(),
                        tx_id: id.to_string(),
                    })
                }
            });
        store.expect_get_transaction().returning(|_, id| {
            Ok(lock_record(
                id,
                serde_json::json!({ metadata_keys::PREDICTED_VAULT_ADDRESS: "CVAULT1" }),
            ))
        });
        store
            .expect_update_onboarding_status()
            .withf(|_, status, patch| {
                *status == OnboardingStatus::Ready
                    && patch.vault_address.as_deref() == Some("CVAULT1")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_transaction_status()
            .returning(|_| Ok(TxStatus::Success));

        // Liveness budget exhausted on the first submit, live on the retry.
        let mut vaults = MockVaultProtocol::new();
        let mut waits = 0u32;
        vaults
            .expect_wait_for_vault_confirmation()
            .times(2)
            .returning(move |_| {
                waits += 1;
                Ok(waits > 1)
            });

        let orchestrator = orchestrator(store, MockWalletProvider::new(), vaults, rpc);

        let err = orchestrator
            .submit_vault_creation("U1", tx_id, "0xHASH")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::VaultNotConfirmed { .. }));
        assert!(err.is_retryable());

        let activation = orchestrator
            .submit_vault_creation("U1", tx_id, "0xHASH")
            .await
            .unwrap();
        assert_eq!(activation.vault_address, "CVAULT1");
        assert_eq!(activation.status, OnboardingStatus::Ready);
    }

    #[tokio::test]
    async fn submit_retry_with_mismatched_hash_stays_not_found() {
        let tx_id = Uuid::new_v4();
        let mut store = MockDatastore::new();
        store.expect_confirm_transaction().returning(|uid, id, _| {
            Err(OrchestratorError::TransactionNotFound {
                user_id: uid.to_string(),
                tx_id: id.to_string(),
            })
        });
        store.expect_get_transaction().returning(|_, id| {
            Ok(lock_record(
                id,
                serde_json::json!({ metadata_keys::PREDICTED_VAULT_ADDRESS: "CVAULT1" }),
            ))
        });

        let orchestrator = orchestrator(
            store,
            MockWalletProvider::new(),
            MockVaultProtocol::new(),
            MockChainRpc::new(),
        );
        let err = orchestrator
            .submit_vault_creation("U1", tx_id, "0xOTHER")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::TransactionNotFound { .. }));
    }

    #[tokio::test]
    async fn full_happy_path_reaches_ready_with_predicted_address() {
        use std::sync::Mutex;

        // Shared record standing in for the persisted row, so the three
        // operations observe each other's writes.
        let state = Arc::new(Mutex::new(user(OnboardingStatus::Pending, None, None)));

        let mut store = MockDatastore::new();
        {
            let state = state.clone();
            store
                .expect_upsert_user()
                .returning(move |_, _| Ok(state.lock().unwrap().clone()));
        }
        {
            let state = state.clone();
            store
                .expect_get_user()
                .returning(move |_| Ok(Some(state.lock().unwrap().clone())));
        }
        {
            let state = state.clone();
            store
                .expect_update_onboarding_status()
                .returning(move |_, status, patch| {
                    let mut record = state.lock().unwrap();
                    record.onboarding_status = status;
                    if let Some(wallet) = patch.wallet_address {
                        record.wallet_address = Some(wallet);
                    }
                    if record.vault_address.is_none() {
                        record.vault_address = patch.vault_address;
                    }
                    Ok(())
                });
        }
        {
            let state = state.clone();
            store
                .expect_advance_onboarding_status()
                .returning(move |_, expected, next| {
                    let mut record = state.lock().unwrap();
                    if record.onboarding_status == expected {
                        record.onboarding_status = next;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                });
        }
        store
            .expect_create_transaction()
            .times(1)
            .returning(|_| Ok(Uuid::new_v4()));
        store
            .expect_confirm_transaction()
            .times(1)
            .returning(|_, _, _| Ok(()));
        store.expect_get_transaction().returning(|_, id| {
            Ok(lock_record(
                id,
                serde_json::json!({ metadata_keys::PREDICTED_VAULT_ADDRESS: "CVAULT1" }),
            ))
        });

        let mut wallets = MockWalletProvider::new();
        wallets.expect_create_or_get_wallet().times(1).returning(|_| {
            Ok(WalletInfo {
                address: "GWALLET".into(),
                chain: "stellar".into(),
            })
        });

        let mut vaults = MockVaultProtocol::new();
        vaults.expect_create_vault().times(1).returning(|_| {
            Ok(VaultCreation {
                transaction_xdr: "XDR1".into(),
                predicted_vault_address: "CVAULT1".into(),
            })
        });
        vaults
            .expect_wait_for_vault_confirmation()
            .times(1)
            .returning(|_| Ok(true));

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_transaction_status()
            .returning(|_| Ok(TxStatus::Success));

        let orchestrator = orchestrator(store, wallets, vaults, rpc);

        let record = orchestrator.onboard_user("U1", "a@x.com").await.unwrap();
        assert_eq!(record.onboarding_status, OnboardingStatus::WalletCreated);
        assert_eq!(record.wallet_address.as_deref(), Some("GWALLET"));

        let preparation = orchestrator.prepare_vault_creation("U1").await.unwrap();
        assert_eq!(preparation.transaction_xdr, "XDR1");
        assert_eq!(preparation.predicted_vault_address, "CVAULT1");
        assert_eq!(
            orchestrator.get_status("U1").await.unwrap().onboarding_status,
            OnboardingStatus::VaultPendingSignature
        );

        let activation = orchestrator
            .submit_vault_creation("U1", preparation.transaction_id, "0xHASH")
            .await
            .unwrap();
        assert_eq!(activation.vault_address, "CVAULT1");

        let settled = orchestrator.get_status("U1").await.unwrap();
        assert_eq!(settled.onboarding_status, OnboardingStatus::Ready);
        assert_eq!(settled.vault_address.as_deref(), Some("CVAULT1"));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_fails_when_vault_never_goes_live() {
        let tx_id = Uuid::new_v4();
        let store = submit_store(tx_id, true);

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_transaction_status()
            .returning(|_| Ok(TxStatus::Success));

        let mut vaults = MockVaultProtocol::new();
        vaults
            .expect_wait_for_vault_confirmation()
            .returning(|_| Ok(false));

        let orchestrator = orchestrator(store, MockWalletProvider::new(), vaults, rpc);
        let err = orchestrator
            .submit_vault_creation("U1", tx_id, "0xHASH")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::VaultNotConfirmed { .. }));
    }
}
