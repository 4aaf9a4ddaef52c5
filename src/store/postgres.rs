//! PostgreSQL datastore

use super::{Datastore, StatusPatch};
use crate::config::DatabaseConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{
    BufferTransaction, NewTransaction, OnboardingStatus, TransactionStatus, TransactionType,
    UserRecord,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// PostgreSQL-backed datastore gateway
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store backed by a connection pool
    pub async fn new(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(OrchestratorError::Database)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                wallet_address TEXT,
                vault_address TEXT,
                onboarding_status TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buffer_transactions (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                amount TEXT,
                shares_delta TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                metadata JSONB NOT NULL DEFAULT '{}',
                stellar_tx_hash TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                confirmed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_buffer_transactions_user
            ON buffer_transactions (user_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> OrchestratorResult<UserRecord> {
    let status_str: String = row.get("onboarding_status");
    let onboarding_status = OnboardingStatus::parse(&status_str).ok_or_else(|| {
        OrchestratorError::Internal(format!("Unknown onboarding status in store: {}", status_str))
    })?;

    Ok(UserRecord {
        user_id: row.get("user_id"),
        email: row.get("email"),
        wallet_address: row.get("wallet_address"),
        vault_address: row.get("vault_address"),
        onboarding_status,
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn transaction_from_row(row: &PgRow) -> OrchestratorResult<BufferTransaction> {
    let type_str: String = row.get("transaction_type");
    let transaction_type = TransactionType::parse(&type_str).ok_or_else(|| {
        OrchestratorError::Internal(format!("Unknown transaction type in store: {}", type_str))
    })?;

    let status_str: String = row.get("status");
    let status = TransactionStatus::parse(&status_str).ok_or_else(|| {
        OrchestratorError::Internal(format!("Unknown transaction status in store: {}", status_str))
    })?;

    Ok(BufferTransaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        transaction_type,
        amount: row.get("amount"),
        shares_delta: row.get("shares_delta"),
        status,
        metadata: row.get("metadata"),
        stellar_tx_hash: row.get("stellar_tx_hash"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        confirmed_at: row.get::<Option<DateTime<Utc>>, _>("confirmed_at"),
    })
}

#[async_trait]
impl Datastore for PgStore {
    async fn upsert_user(&self, user_id: &str, email: &str) -> OrchestratorResult<UserRecord> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, onboarding_status, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(OnboardingStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        user_from_row(&row)
    }

    async fn get_user(&self, user_id: &str) -> OrchestratorResult<Option<UserRecord>> {
        let row = sqlx::query("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_onboarding_status(
        &self,
        user_id: &str,
        status: OnboardingStatus,
        patch: StatusPatch,
    ) -> OrchestratorResult<()> {
        // vault_address is append-only: COALESCE keeps an existing value.
        let result = sqlx::query(
            r#"
            UPDATE users
            SET onboarding_status = $2,
                wallet_address = COALESCE($3, wallet_address),
                vault_address = COALESCE(vault_address, $4),
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(patch.wallet_address)
        .bind(patch.vault_address)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::UserNotFound {
                user_id: user_id.to_string(),
            });
        }

        debug!(user_id, status = status.as_str(), "Onboarding status updated");
        Ok(())
    }

    async fn advance_onboarding_status(
        &self,
        user_id: &str,
        expected: OnboardingStatus,
        next: OnboardingStatus,
    ) -> OrchestratorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET onboarding_status = $3, updated_at = NOW()
            WHERE user_id = $1 AND onboarding_status = $2
            "#,
        )
        .bind(user_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_transaction(&self, input: NewTransaction) -> OrchestratorResult<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO buffer_transactions
                (id, user_id, transaction_type, amount, shares_delta, status, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&input.user_id)
        .bind(input.transaction_type.as_str())
        .bind(input.amount)
        .bind(input.shares_delta)
        .bind(TransactionStatus::Pending.as_str())
        .bind(input.metadata)
        .execute(&self.pool)
        .await?;

        debug!(
            user_id = %input.user_id,
            tx_id = %id,
            tx_type = input.transaction_type.as_str(),
            "Transaction record created"
        );
        Ok(id)
    }

    async fn confirm_transaction(
        &self,
        user_id: &str,
        tx_id: Uuid,
        tx_hash: &str,
    ) -> OrchestratorResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE buffer_transactions
            SET status = $4, stellar_tx_hash = $3, confirmed_at = NOW()
            WHERE id = $1 AND user_id = $2 AND status = $5
            "#,
        )
        .bind(tx_id)
        .bind(user_id)
        .bind(tx_hash)
        .bind(TransactionStatus::Confirmed.as_str())
        .bind(TransactionStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::TransactionNotFound {
                user_id: user_id.to_string(),
                tx_id: tx_id.to_string(),
            });
        }

        Ok(())
    }

    async fn get_transaction(
        &self,
        user_id: &str,
        tx_id: Uuid,
    ) -> OrchestratorResult<BufferTransaction> {
        let row = sqlx::query(
            "SELECT * FROM buffer_transactions WHERE id = $1 AND user_id = $2",
        )
        .bind(tx_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => transaction_from_row(&row),
            None => Err(OrchestratorError::TransactionNotFound {
                user_id: user_id.to_string(),
                tx_id: tx_id.to_string(),
            }),
        }
    }
}
