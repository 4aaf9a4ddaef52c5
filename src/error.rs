//! Error types for the buffer orchestrator
//!
//! Every failure carries its category as an enum variant set at the throw
//! site, so the external error code and HTTP status are derived structurally
//! rather than by matching on message text.

use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for orchestration operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("User {user_id} not found")]
    UserNotFound { user_id: String },

    #[error("Transaction {tx_id} not found for user {user_id}")]
    TransactionNotFound { user_id: String, tx_id: String },

    #[error("User {user_id} has no wallet address yet")]
    WalletNotReady { user_id: String },

    #[error("User {user_id} already has an active vault")]
    VaultAlreadyActive { user_id: String },

    #[error("Onboarding step already in progress for user {user_id}")]
    OnboardingInProgress { user_id: String },

    #[error("Vault creation record for user {user_id} is missing its predicted address")]
    VaultSubmitInvalidState { user_id: String },

    #[error("Vault {vault_address} not confirmed on-chain within the polling budget")]
    VaultNotConfirmed { vault_address: String },

    #[error("Onboarding incomplete for user {user_id}: {message}")]
    OnboardingIncomplete { user_id: String, message: String },

    #[error("No buffer contract available for user {user_id}")]
    ContractNotAvailable { user_id: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Server-side signing is not permitted; submit a transaction hash signed by the wallet owner")]
    UserSignatureRequired,

    #[error("Chain transaction {tx_hash} reached terminal status {status}")]
    ChainTransactionFailed { tx_hash: String, status: String },

    #[error("Chain RPC error: {0}")]
    ChainRpc(String),

    #[error("Wallet provider error: {0}")]
    WalletProvider(String),

    #[error("Vault protocol error: {0}")]
    VaultProtocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// External error code surfaced to callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestratorError::UserNotFound { .. } => "USER_NOT_FOUND",
            OrchestratorError::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            OrchestratorError::WalletNotReady { .. } => "WALLET_NOT_READY",
            OrchestratorError::VaultAlreadyActive { .. } => "VAULT_ALREADY_ACTIVE",
            OrchestratorError::OnboardingInProgress { .. } => "ONBOARDING_IN_PROGRESS",
            OrchestratorError::VaultSubmitInvalidState { .. } => "VAULT_SUBMIT_INVALID_STATE",
            OrchestratorError::VaultNotConfirmed { .. } => "VAULT_NOT_CONFIRMED",
            OrchestratorError::OnboardingIncomplete { .. } => "ONBOARDING_INCOMPLETE",
            OrchestratorError::ContractNotAvailable { .. } => "CONTRACT_NOT_AVAILABLE",
            OrchestratorError::Validation(_) => "VALIDATION_ERROR",
            OrchestratorError::InvalidAmount(_) => "INVALID_AMOUNT",
            OrchestratorError::UserSignatureRequired => "USER_SIGNATURE_REQUIRED",
            OrchestratorError::ChainTransactionFailed { .. } => "CHAIN_TRANSACTION_FAILED",
            OrchestratorError::Config(_)
            | OrchestratorError::Database(_)
            | OrchestratorError::ChainRpc(_)
            | OrchestratorError::WalletProvider(_)
            | OrchestratorError::VaultProtocol(_)
            | OrchestratorError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the thin request layer should answer with.
    pub fn http_status(&self) -> StatusCode {
        match self {
            OrchestratorError::UserNotFound { .. }
            | OrchestratorError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
            OrchestratorError::WalletNotReady { .. }
            | OrchestratorError::VaultAlreadyActive { .. }
            | OrchestratorError::OnboardingInProgress { .. }
            | OrchestratorError::VaultSubmitInvalidState { .. }
            | OrchestratorError::VaultNotConfirmed { .. }
            | OrchestratorError::OnboardingIncomplete { .. }
            | OrchestratorError::ContractNotAvailable { .. }
            | OrchestratorError::ChainTransactionFailed { .. } => StatusCode::CONFLICT,
            OrchestratorError::Validation(_)
            | OrchestratorError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::UserSignatureRequired => StatusCode::FORBIDDEN,
            OrchestratorError::Config(_)
            | OrchestratorError::Database(_)
            | OrchestratorError::ChainRpc(_)
            | OrchestratorError::WalletProvider(_)
            | OrchestratorError::VaultProtocol(_)
            | OrchestratorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if the caller can retry after completing a prior step.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::WalletNotReady { .. }
                | OrchestratorError::OnboardingInProgress { .. }
                | OrchestratorError::OnboardingIncomplete { .. }
                | OrchestratorError::VaultNotConfirmed { .. }
                | OrchestratorError::ChainRpc(_)
        )
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<OrchestratorError> {
        vec![
            OrchestratorError::Config("x".into()),
            OrchestratorError::Database(sqlx::Error::RowNotFound),
            OrchestratorError::UserNotFound { user_id: "u".into() },
            OrchestratorError::TransactionNotFound {
                user_id: "u".into(),
                tx_id: "t".into(),
            },
            OrchestratorError::WalletNotReady { user_id: "u".into() },
            OrchestratorError::VaultAlreadyActive { user_id: "u".into() },
            OrchestratorError::OnboardingInProgress { user_id: "u".into() },
            OrchestratorError::VaultSubmitInvalidState { user_id: "u".into() },
            OrchestratorError::VaultNotConfirmed {
                vault_address: "C...".into(),
            },
            OrchestratorError::OnboardingIncomplete {
                user_id: "u".into(),
                message: "no wallet".into(),
            },
            OrchestratorError::ContractNotAvailable { user_id: "u".into() },
            OrchestratorError::Validation("missing hash".into()),
            OrchestratorError::InvalidAmount("-1".into()),
            OrchestratorError::UserSignatureRequired,
            OrchestratorError::ChainTransactionFailed {
                tx_hash: "h".into(),
                status: "FAILED".into(),
            },
            OrchestratorError::ChainRpc("boom".into()),
            OrchestratorError::WalletProvider("boom".into()),
            OrchestratorError::VaultProtocol("boom".into()),
            OrchestratorError::Internal("boom".into()),
        ]
    }

    #[test]
    fn resolver_is_total() {
        for err in all_variants() {
            assert!(!err.error_code().is_empty());
            let status = err.http_status();
            assert!(status.is_client_error() || status.is_server_error());
        }
    }

    #[test]
    fn conflict_codes_map_to_409() {
        let err = OrchestratorError::VaultAlreadyActive { user_id: "u".into() };
        assert_eq!(err.error_code(), "VAULT_ALREADY_ACTIVE");
        assert_eq!(err.http_status(), StatusCode::CONFLICT);

        let err = OrchestratorError::WalletNotReady { user_id: "u".into() };
        assert_eq!(err.error_code(), "WALLET_NOT_READY");
        assert_eq!(err.http_status(), StatusCode::CONFLICT);

        let err = OrchestratorError::VaultNotConfirmed {
            vault_address: "C".into(),
        };
        assert_eq!(err.error_code(), "VAULT_NOT_CONFIRMED");
        assert_eq!(err.http_status(), StatusCode::CONFLICT);
    }

    #[test]
    fn policy_rejection_is_forbidden_and_permanent() {
        let err = OrchestratorError::UserSignatureRequired;
        assert_eq!(err.error_code(), "USER_SIGNATURE_REQUIRED");
        assert_eq!(err.http_status(), StatusCode::FORBIDDEN);
        assert!(!err.is_retryable());
    }

    #[test]
    fn internal_errors_surface_generically() {
        let err = OrchestratorError::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
