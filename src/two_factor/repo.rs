//! Two-factor persistence.

use super::models::{AuditEntry, TwoFactorEnrollment, TwoFactorState};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Storage contract for enrollments.
///
/// Every state transition is a conditional write that reports whether it
/// applied, so concurrent requests cannot skip a state or reuse a code.
#[async_trait]
pub trait TwoFactorStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorEnrollment>>;

    /// Create or replace a pending enrollment. `false` when one is already enabled.
    async fn upsert_pending(
        &self,
        user_id: Uuid,
        secret: &str,
        backup_code_hashes: &[String],
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// `pending -> enabled`. `false` when the enrollment is not pending.
    async fn enable(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// `enabled -> disabled`, purging the secret and the remaining codes.
    async fn disable(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Remove a backup code if it is still present. `true` only for the caller that removed it.
    async fn consume_backup_code(&self, user_id: Uuid, code_hash: &str) -> Result<bool>;

    async fn replace_backup_codes(&self, user_id: Uuid, code_hashes: &[String]) -> Result<bool>;

    async fn record_attempt(&self, entry: &AuditEntry) -> Result<()>;
}

pub struct PgTwoFactorStore {
    pool: PgPool,
}

impl PgTwoFactorStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl TwoFactorStore for PgTwoFactorStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorEnrollment>> {
        let query = r"
            SELECT user_id, secret, backup_codes, state, created_at, enabled_at, disabled_at
            FROM user_two_factor
            WHERE user_id = $1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span("SELECT", query))
            .await
            .context("failed to load two-factor enrollment")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.get("state");
        Ok(Some(TwoFactorEnrollment {
            user_id: row.get("user_id"),
            secret: row.get("secret"),
            backup_code_hashes: row.get("backup_codes"),
            state: state.parse().map_err(|err: String| anyhow!(err))?,
            created_at: row.get("created_at"),
            enabled_at: row.get("enabled_at"),
            disabled_at: row.get("disabled_at"),
        }))
    }

    async fn upsert_pending(
        &self,
        user_id: Uuid,
        secret: &str,
        backup_code_hashes: &[String],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            INSERT INTO user_two_factor
                (user_id, secret, backup_codes, state, created_at)
            VALUES ($1, $2, $3, 'pending', $4)
            ON CONFLICT (user_id) DO UPDATE
            SET secret = EXCLUDED.secret,
                backup_codes = EXCLUDED.backup_codes,
                state = 'pending',
                created_at = EXCLUDED.created_at,
                enabled_at = NULL,
                disabled_at = NULL
            WHERE user_two_factor.state <> 'enabled'
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(secret)
            .bind(backup_code_hashes)
            .bind(at)
            .execute(&self.pool)
            .instrument(span("INSERT", query))
            .await
            .context("failed to store pending enrollment")?;
        Ok(result.rows_affected() > 0)
    }

    async fn enable(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE user_two_factor
            SET state = 'enabled', enabled_at = $2
            WHERE user_id = $1 AND state = 'pending'
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to enable two-factor")?;
        Ok(result.rows_affected() > 0)
    }

    async fn disable(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE user_two_factor
            SET state = 'disabled', disabled_at = $2, secret = NULL, backup_codes = '{}'
            WHERE user_id = $1 AND state = 'enabled'
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to disable two-factor")?;
        Ok(result.rows_affected() > 0)
    }

    async fn consume_backup_code(&self, user_id: Uuid, code_hash: &str) -> Result<bool> {
        let query = r"
            UPDATE user_two_factor
            SET backup_codes = array_remove(backup_codes, $2)
            WHERE user_id = $1
              AND state = 'enabled'
              AND $2 = ANY(backup_codes)
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(code_hash)
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to consume backup code")?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_backup_codes(&self, user_id: Uuid, code_hashes: &[String]) -> Result<bool> {
        let query = r"
            UPDATE user_two_factor
            SET backup_codes = $2
            WHERE user_id = $1 AND state = 'enabled'
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(code_hashes)
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to replace backup codes")?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_attempt(&self, entry: &AuditEntry) -> Result<()> {
        let query = r"
            INSERT INTO two_factor_audit
                (user_id, action, method, success, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(query)
            .bind(entry.user_id)
            .bind(entry.action.as_str())
            .bind(entry.method.as_str())
            .bind(entry.success)
            .bind(entry.at)
            .execute(&self.pool)
            .instrument(span("INSERT", query))
            .await
            .context("failed to write two-factor audit entry")?;
        Ok(())
    }
}

/// Whether a new pending enrollment may overwrite one in `state`.
pub(crate) fn can_replace(state: TwoFactorState) -> bool {
    state != TwoFactorState::Enabled
}
