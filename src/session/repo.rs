//! Session persistence.

use super::device::DeviceInfo;
use super::models::{RevokeReason, Session};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

/// Storage contract for sessions.
///
/// Revocations are conditional on the row still being active, so a revoked
/// session is never flipped back and repeated sweeps are no-ops.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Session>>;

    /// Active sessions of a user, most recent activity first.
    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>>;

    /// Revoke one active session. With `owner` set, only that user's session matches.
    async fn revoke(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Revoke every active session of `user_id` except `keep`.
    async fn revoke_all_except(
        &self,
        user_id: Uuid,
        keep: Uuid,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Keep the `retain` most recently active sessions of a user, revoke the rest.
    async fn revoke_beyond(
        &self,
        user_id: Uuid,
        retain: usize,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Mark every active session past its expiry as expired.
    async fn revoke_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
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

const SESSION_COLUMNS: &str = r"
    id, user_id, device_type, device_os, device_browser, ip_address, user_agent,
    created_at, last_activity, expires_at, is_active, revoked_at, revoke_reason
";

fn session_from_row(row: &PgRow) -> Session {
    let device_type: String = row.get("device_type");
    let reason: Option<String> = row.get("revoke_reason");
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        device: DeviceInfo::from_columns(
            &device_type,
            row.get("device_os"),
            row.get("device_browser"),
        ),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        created_at: row.get("created_at"),
        last_activity: row.get("last_activity"),
        expires_at: row.get("expires_at"),
        is_active: row.get("is_active"),
        revoked_at: row.get("revoked_at"),
        revoke_reason: reason.and_then(|reason| reason.parse().ok()),
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO user_sessions
                (id, user_id, device_type, device_os, device_browser, ip_address, user_agent,
                 created_at, last_activity, expires_at, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE)
        ";
        sqlx::query(query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.device.device_type.as_str())
            .bind(&session.device.os)
            .bind(&session.device.browser)
            .bind(session.ip_address.as_deref())
            .bind(session.user_agent.as_deref())
            .bind(session.created_at)
            .bind(session.last_activity)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span("SELECT", "SELECT ... FROM user_sessions WHERE id = $1"))
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions
             WHERE user_id = $1 AND is_active
             ORDER BY last_activity DESC, created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span(
                "SELECT",
                "SELECT ... FROM user_sessions WHERE user_id = $1 AND is_active",
            ))
            .await
            .context("failed to list sessions")?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn revoke(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            UPDATE user_sessions
            SET is_active = FALSE, revoked_at = $3, revoke_reason = $4
            WHERE id = $1
              AND is_active
              AND ($2::uuid IS NULL OR user_id = $2)
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(owner)
            .bind(at)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to revoke session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_except(
        &self,
        user_id: Uuid,
        keep: Uuid,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let query = r"
            UPDATE user_sessions
            SET is_active = FALSE, revoked_at = $3, revoke_reason = $4
            WHERE user_id = $1 AND id <> $2 AND is_active
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(keep)
            .bind(at)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to revoke other sessions")?;
        Ok(result.rows_affected())
    }

    async fn revoke_beyond(
        &self,
        user_id: Uuid,
        retain: usize,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let query = r"
            UPDATE user_sessions
            SET is_active = FALSE, revoked_at = $3, revoke_reason = $4
            WHERE id IN (
                SELECT id FROM user_sessions
                WHERE user_id = $1 AND is_active
                ORDER BY last_activity DESC, created_at DESC
                OFFSET $2
            )
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(i64::try_from(retain).unwrap_or(i64::MAX))
            .bind(at)
            .bind(reason.as_str())
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to trim sessions")?;
        Ok(result.rows_affected())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE user_sessions SET last_activity = $2 WHERE id = $1 AND is_active";
        sqlx::query(query)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to update session activity")?;
        Ok(())
    }

    async fn revoke_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = r"
            UPDATE user_sessions
            SET is_active = FALSE, revoked_at = $1, revoke_reason = $2
            WHERE is_active AND expires_at < $1
        ";
        let result = sqlx::query(query)
            .bind(now)
            .bind(RevokeReason::Expired.as_str())
            .execute(&self.pool)
            .instrument(span("UPDATE", query))
            .await
            .context("failed to sweep expired sessions")?;
        Ok(result.rows_affected())
    }
}
