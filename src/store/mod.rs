//! Datastore gateway
//!
//! Passive persistence for user onboarding records and buffer transactions.
//! The trait is the seam the orchestrator and lifecycle manager are
//! constructed with; business rules live above it.

pub mod postgres;

pub use postgres::PgStore;

use crate::error::OrchestratorResult;
use crate::model::{BufferTransaction, NewTransaction, OnboardingStatus, UserRecord};

use async_trait::async_trait;
use uuid::Uuid;

/// Fields written alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub wallet_address: Option<String>,
    /// Append-only: persisted only when the stored value is still null.
    pub vault_address: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Create the record with status `PENDING` if absent; an existing record
    /// is left untouched.
    async fn upsert_user(&self, user_id: &str, email: &str) -> OrchestratorResult<UserRecord>;

    async fn get_user(&self, user_id: &str) -> OrchestratorResult<Option<UserRecord>>;

    /// Unconditional status write with an optional field patch.
    async fn update_onboarding_status(
        &self,
        user_id: &str,
        status: OnboardingStatus,
        patch: StatusPatch,
    ) -> OrchestratorResult<()>;

    /// Conditional status advance guarded by the expected prior status.
    /// Returns false when another writer got there first.
    async fn advance_onboarding_status(
        &self,
        user_id: &str,
        expected: OnboardingStatus,
        next: OnboardingStatus,
    ) -> OrchestratorResult<bool>;

    /// Insert a `PENDING` transaction record, returning its generated id.
    async fn create_transaction(&self, input: NewTransaction) -> OrchestratorResult<Uuid>;

    /// Single atomic conditional update scoped by `(id, user_id, PENDING)`.
    /// Fails when the record is missing, owned by another user, or already
    /// settled.
    async fn confirm_transaction(
        &self,
        user_id: &str,
        tx_id: Uuid,
        tx_hash: &str,
    ) -> OrchestratorResult<()>;

    async fn get_transaction(
        &self,
        user_id: &str,
        tx_id: Uuid,
    ) -> OrchestratorResult<BufferTransaction>;
}
