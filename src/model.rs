//! Domain records for onboarding and buffer transactions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User onboarding state machine.
///
/// `NotStarted` is virtual: it is reported when no record exists and is never
/// persisted. `Failed` is terminal-but-recoverable; re-running onboarding
/// re-derives the forward state from persisted data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingStatus {
    NotStarted,
    Pending,
    WalletCreated,
    VaultPreparing,
    VaultPendingSignature,
    Ready,
    Failed,
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStatus::NotStarted => "NOT_STARTED",
            OnboardingStatus::Pending => "PENDING",
            OnboardingStatus::WalletCreated => "WALLET_CREATED",
            OnboardingStatus::VaultPreparing => "VAULT_PREPARING",
            OnboardingStatus::VaultPendingSignature => "VAULT_PENDING_SIGNATURE",
            OnboardingStatus::Ready => "READY",
            OnboardingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_STARTED" => Some(OnboardingStatus::NotStarted),
            "PENDING" => Some(OnboardingStatus::Pending),
            "WALLET_CREATED" => Some(OnboardingStatus::WalletCreated),
            "VAULT_PREPARING" => Some(OnboardingStatus::VaultPreparing),
            "VAULT_PENDING_SIGNATURE" => Some(OnboardingStatus::VaultPendingSignature),
            "READY" => Some(OnboardingStatus::Ready),
            "FAILED" => Some(OnboardingStatus::Failed),
            _ => None,
        }
    }

    /// Position in the forward progression. `Failed` sits outside it.
    fn rank(&self) -> u8 {
        match self {
            OnboardingStatus::NotStarted => 0,
            OnboardingStatus::Pending => 1,
            OnboardingStatus::WalletCreated => 2,
            OnboardingStatus::VaultPreparing => 3,
            OnboardingStatus::VaultPendingSignature => 4,
            OnboardingStatus::Ready => 5,
            OnboardingStatus::Failed => 0,
        }
    }

    /// Status never moves backward except into `Failed`; recovery out of
    /// `Failed` may re-enter any forward state.
    pub fn can_advance_to(&self, next: OnboardingStatus) -> bool {
        if next == OnboardingStatus::Failed {
            return true;
        }
        if *self == OnboardingStatus::Failed {
            return true;
        }
        next.rank() >= self.rank()
    }
}

/// One onboarding record per user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    pub wallet_address: Option<String>,
    pub vault_address: Option<String>,
    pub onboarding_status: OnboardingStatus,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Virtual view reported before any record exists.
    pub fn not_started(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: String::new(),
            wallet_address: None,
            vault_address: None,
            onboarding_status: OnboardingStatus::NotStarted,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    /// Vault-creation bookkeeping.
    Lock,
    Unlock,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdraw => "WITHDRAW",
            TransactionType::Lock => "LOCK",
            TransactionType::Unlock => "UNLOCK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAW" => Some(TransactionType::Withdraw),
            "LOCK" => Some(TransactionType::Lock),
            "UNLOCK" => Some(TransactionType::Unlock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "CONFIRMED" => Some(TransactionStatus::Confirmed),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// One record per fund-movement or vault-creation attempt.
///
/// Amounts are stroops carried as integer strings; `metadata` carries the
/// predicted vault address and contract id between prepare and submit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferTransaction {
    pub id: Uuid,
    pub user_id: String,
    pub transaction_type: TransactionType,
    pub amount: Option<String>,
    pub shares_delta: Option<String>,
    pub status: TransactionStatus,
    pub metadata: serde_json::Value,
    pub stellar_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Input for creating a transaction record; always lands as `PENDING`.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub transaction_type: TransactionType,
    pub amount: Option<String>,
    pub shares_delta: Option<String>,
    pub metadata: serde_json::Value,
}

/// Metadata keys carried between prepare and submit steps.
pub mod metadata_keys {
    pub const PREDICTED_VAULT_ADDRESS: &str = "predictedVaultAddress";
    pub const CONTRACT_ID: &str = "contractId";
    pub const WALLET_ADDRESS: &str = "walletAddress";
}
