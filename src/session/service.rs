use super::device::DeviceInfo;
use super::models::{
    CreatedSession, InvalidSession, RevokeOutcome, RevokeReason, Session, SessionValidation,
};
use super::repo::SessionStore;
use crate::store::{self, DEFAULT_STORE_TIMEOUT, StoreError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};
use uuid::Uuid;

const DEFAULT_SESSION_TTL_DAYS: i64 = 30;
const DEFAULT_MAX_ACTIVE_SESSIONS: usize = 10;
const DEFAULT_REFRESH_AFTER_MINUTES: i64 = 60;
const DEFAULT_IDLE_TIMEOUT_MINUTES: i64 = 60;
const DEFAULT_WARNING_THRESHOLD_MINUTES: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    ttl: ChronoDuration,
    max_active: usize,
    refresh_after: ChronoDuration,
    idle_timeout: ChronoDuration,
    warning_threshold: ChronoDuration,
    store_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: ChronoDuration::days(DEFAULT_SESSION_TTL_DAYS),
            max_active: DEFAULT_MAX_ACTIVE_SESSIONS,
            refresh_after: ChronoDuration::minutes(DEFAULT_REFRESH_AFTER_MINUTES),
            idle_timeout: ChronoDuration::minutes(DEFAULT_IDLE_TIMEOUT_MINUTES),
            warning_threshold: ChronoDuration::minutes(DEFAULT_WARNING_THRESHOLD_MINUTES),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_idle_timeout_minutes(mut self, minutes: i64) -> Self {
        self.idle_timeout = ChronoDuration::minutes(minutes);
        self
    }

    #[must_use]
    pub fn with_warning_threshold_minutes(mut self, minutes: i64) -> Self {
        self.warning_threshold = ChronoDuration::minutes(minutes);
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn idle_timeout_minutes(&self) -> i64 {
        self.idle_timeout.num_minutes()
    }

    #[must_use]
    pub fn warning_threshold_minutes(&self) -> i64 {
        self.warning_threshold.num_minutes()
    }

    #[must_use]
    pub fn max_active(&self) -> usize {
        self.max_active
    }
}

/// Idle-timeout view of a valid session, for the client-side warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleStatus {
    pub idle_expires_at: DateTime<Utc>,
    pub expires_soon: bool,
}

/// Session lifecycle operations.
///
/// Failure policy: every store call is bounded; lookups and writes fail closed
/// with [`SessionError`]. The activity refresh on validation is best-effort.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Persist a new active session and enforce the per-user cap.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the session cannot be persisted.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        device: Option<DeviceInfo>,
    ) -> Result<CreatedSession, SessionError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            device: device.unwrap_or_else(|| DeviceInfo::from_user_agent(user_agent)),
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            created_at: now,
            last_activity: now,
            expires_at: now + self.config.ttl,
            is_active: true,
            revoked_at: None,
            revoke_reason: None,
        };

        store::bounded(
            "session.insert",
            self.config.store_timeout,
            self.store.insert(&session),
        )
        .await?;

        let evicted = store::bounded(
            "session.revoke_beyond",
            self.config.store_timeout,
            self.store.revoke_beyond(
                user_id,
                self.config.max_active,
                RevokeReason::MaxSessions,
                now,
            ),
        )
        .await?;
        if evicted > 0 {
            info!(user_id = %user_id, evicted, "revoked sessions beyond the active cap");
        }

        Ok(CreatedSession {
            session_id: session.id,
            expires_at: session.expires_at,
        })
    }

    /// Validate a raw session token (cookie or bearer value).
    ///
    /// # Errors
    /// Returns [`SessionError`] if the store lookup fails.
    pub async fn validate_token(&self, token: &str) -> Result<SessionValidation, SessionError> {
        match Uuid::parse_str(token.trim()) {
            Ok(id) => self.validate_session(id).await,
            Err(_) => Ok(SessionValidation::Invalid(InvalidSession::NotFound)),
        }
    }

    /// # Errors
    /// Returns [`SessionError`] if the store lookup fails.
    pub async fn validate_session(&self, id: Uuid) -> Result<SessionValidation, SessionError> {
        let Some(mut session) =
            store::bounded("session.find", self.config.store_timeout, self.store.find(id)).await?
        else {
            return Ok(SessionValidation::Invalid(InvalidSession::NotFound));
        };

        if !session.is_active {
            return Ok(SessionValidation::Invalid(InvalidSession::Inactive));
        }

        let now = Utc::now();
        if session.is_expired(now) {
            // Already invalid; the revocation only makes the state durable.
            store::best_effort(
                "session.revoke_expired",
                self.config.store_timeout,
                async {
                    self.store
                        .revoke(id, None, RevokeReason::Expired, now)
                        .await
                        .map(|_| ())
                },
            )
            .await;
            debug!(session_id = %id, "session expired");
            return Ok(SessionValidation::Invalid(InvalidSession::Expired));
        }

        let needs_refresh = now - session.last_activity > self.config.refresh_after;
        if needs_refresh
            && store::best_effort(
                "session.touch",
                self.config.store_timeout,
                self.store.touch(id, now),
            )
            .await
        {
            session.last_activity = now;
        }

        Ok(SessionValidation::Valid {
            session,
            needs_refresh,
        })
    }

    /// Revoke one of the caller's own sessions.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the store update fails.
    pub async fn revoke_session(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<RevokeOutcome, SessionError> {
        let revoked = store::bounded(
            "session.revoke",
            self.config.store_timeout,
            self.store
                .revoke(id, Some(user_id), RevokeReason::UserRevoked, Utc::now()),
        )
        .await?;
        if revoked {
            info!(user_id = %user_id, session_id = %id, "session revoked");
            Ok(RevokeOutcome::Revoked)
        } else {
            Ok(RevokeOutcome::NotFound)
        }
    }

    /// Sign out everywhere except `current_id`. Returns the number revoked.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the store update fails.
    pub async fn revoke_all_other_sessions(
        &self,
        current_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, SessionError> {
        let revoked = store::bounded(
            "session.revoke_all_except",
            self.config.store_timeout,
            self.store.revoke_all_except(
                user_id,
                current_id,
                RevokeReason::RevokedOthers,
                Utc::now(),
            ),
        )
        .await?;
        info!(user_id = %user_id, revoked, "revoked all other sessions");
        Ok(revoked)
    }

    /// Active sessions of a user, most recent first.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the store lookup fails.
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        let now = Utc::now();
        let sessions = store::bounded(
            "session.list_active",
            self.config.store_timeout,
            self.store.list_active(user_id),
        )
        .await?;
        Ok(sessions
            .into_iter()
            .filter(|session| !session.is_expired(now))
            .collect())
    }

    /// Mark every expired session inactive. Safe to run repeatedly.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the store update fails.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, SessionError> {
        let swept = store::bounded(
            "session.revoke_expired",
            self.config.store_timeout,
            self.store.revoke_expired(Utc::now()),
        )
        .await?;
        if swept > 0 {
            info!(swept, "expired sessions cleaned up");
        }
        Ok(swept)
    }

    #[must_use]
    pub fn idle_status(&self, session: &Session, now: DateTime<Utc>) -> IdleStatus {
        let idle_expires_at = (session.last_activity + self.config.idle_timeout).min(session.expires_at);
        IdleStatus {
            idle_expires_at,
            expires_soon: idle_expires_at - now <= self.config.warning_threshold,
        }
    }
}

/// Run [`SessionManager::cleanup_expired_sessions`] on a fixed cadence.
pub fn spawn_expiry_sweeper(
    manager: Arc<SessionManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = manager.cleanup_expired_sessions().await {
                error!("session expiry sweep failed: {err}");
            }
            sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    fn manager() -> (Arc<MemorySessionStore>, SessionManager) {
        let store = Arc::new(MemorySessionStore::new());
        let manager = SessionManager::new(store.clone(), SessionConfig::default());
        (store, manager)
    }

    fn stored_session(user_id: Uuid, last_activity: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id,
            device: DeviceInfo::default(),
            ip_address: None,
            user_agent: None,
            created_at: last_activity,
            last_activity,
            expires_at: last_activity + ChronoDuration::days(30),
            is_active: true,
            revoked_at: None,
            revoke_reason: None,
        }
    }

    #[tokio::test]
    async fn created_session_validates() -> Result<()> {
        let (_store, manager) = manager();
        let user_id = Uuid::new_v4();
        let created = manager
            .create_session(user_id, Some("203.0.113.1"), Some("curl/8.0"), None)
            .await?;
        assert!(created.expires_at > Utc::now() + ChronoDuration::days(29));

        let validation = manager.validate_session(created.session_id).await?;
        assert!(validation.is_valid());
        assert_eq!(validation.user_id(), Some(user_id));
        assert!(!validation.needs_refresh());
        Ok(())
    }

    #[tokio::test]
    async fn revoked_session_is_invalid() -> Result<()> {
        let (_store, manager) = manager();
        let user_id = Uuid::new_v4();
        let created = manager.create_session(user_id, None, None, None).await?;

        assert_eq!(
            manager.revoke_session(created.session_id, user_id).await?,
            RevokeOutcome::Revoked
        );
        assert_eq!(
            manager.validate_session(created.session_id).await?,
            SessionValidation::Invalid(InvalidSession::Inactive)
        );
        // Terminal: a second revoke finds nothing active.
        assert_eq!(
            manager.revoke_session(created.session_id, user_id).await?,
            RevokeOutcome::NotFound
        );
        Ok(())
    }

    #[tokio::test]
    async fn cannot_revoke_someone_elses_session() -> Result<()> {
        let (_store, manager) = manager();
        let owner = Uuid::new_v4();
        let created = manager.create_session(owner, None, None, None).await?;

        assert_eq!(
            manager.revoke_session(created.session_id, Uuid::new_v4()).await?,
            RevokeOutcome::NotFound
        );
        assert!(manager.validate_session(created.session_id).await?.is_valid());
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_invalid_and_revoked() -> Result<()> {
        let (store, manager) = manager();
        let mut session = stored_session(Uuid::new_v4(), Utc::now() - ChronoDuration::days(31));
        session.expires_at = Utc::now() - ChronoDuration::seconds(1);
        store.insert(&session).await?;

        assert_eq!(
            manager.validate_session(session.id).await?,
            SessionValidation::Invalid(InvalidSession::Expired)
        );
        let stored = store.find(session.id).await?.ok_or_else(|| anyhow!("missing"))?;
        assert!(!stored.is_active);
        assert_eq!(stored.revoke_reason, Some(RevokeReason::Expired));
        Ok(())
    }

    #[tokio::test]
    async fn stale_activity_is_refreshed() -> Result<()> {
        let (store, manager) = manager();
        let stale = Utc::now() - ChronoDuration::hours(2);
        let session = stored_session(Uuid::new_v4(), stale);
        store.insert(&session).await?;

        let validation = manager.validate_session(session.id).await?;
        assert!(validation.is_valid());
        assert!(validation.needs_refresh());
        let stored = store.find(session.id).await?.ok_or_else(|| anyhow!("missing"))?;
        assert!(stored.last_activity > stale);
        Ok(())
    }

    #[tokio::test]
    async fn eleventh_session_evicts_least_recent() -> Result<()> {
        let (store, manager) = manager();
        let user_id = Uuid::new_v4();
        let base = Utc::now() - ChronoDuration::minutes(30);
        let mut existing = Vec::new();
        for minute in 0..10 {
            let session = stored_session(user_id, base + ChronoDuration::minutes(minute));
            store.insert(&session).await?;
            existing.push(session.id);
        }

        let created = manager.create_session(user_id, None, None, None).await?;

        let active = manager.list_sessions(user_id).await?;
        assert_eq!(active.len(), 10);
        assert_eq!(active.first().map(|s| s.id), Some(created.session_id));
        assert!(!manager.validate_session(existing[0]).await?.is_valid());
        for id in &existing[1..] {
            assert!(manager.validate_session(*id).await?.is_valid());
        }
        let evicted = store.find(existing[0]).await?.ok_or_else(|| anyhow!("missing"))?;
        assert_eq!(evicted.revoke_reason, Some(RevokeReason::MaxSessions));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_others_keeps_current() -> Result<()> {
        let (_store, manager) = manager();
        let user_id = Uuid::new_v4();
        let other_user = Uuid::new_v4();
        let current = manager.create_session(user_id, None, None, None).await?;
        manager.create_session(user_id, None, None, None).await?;
        manager.create_session(user_id, None, None, None).await?;
        let unrelated = manager.create_session(other_user, None, None, None).await?;

        let revoked = manager
            .revoke_all_other_sessions(current.session_id, user_id)
            .await?;
        assert_eq!(revoked, 2);
        assert!(manager.validate_session(current.session_id).await?.is_valid());
        assert!(manager.validate_session(unrelated.session_id).await?.is_valid());
        assert_eq!(manager.list_sessions(user_id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() -> Result<()> {
        let (store, manager) = manager();
        let mut expired = stored_session(Uuid::new_v4(), Utc::now() - ChronoDuration::days(40));
        expired.expires_at = Utc::now() - ChronoDuration::days(10);
        store.insert(&expired).await?;
        store
            .insert(&stored_session(Uuid::new_v4(), Utc::now()))
            .await?;

        assert_eq!(manager.cleanup_expired_sessions().await?, 1);
        assert_eq!(manager.cleanup_expired_sessions().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_token_is_not_found() -> Result<()> {
        let (_store, manager) = manager();
        assert_eq!(
            manager.validate_token("not-a-uuid").await?,
            SessionValidation::Invalid(InvalidSession::NotFound)
        );
        assert_eq!(
            manager.validate_token(&Uuid::new_v4().to_string()).await?,
            SessionValidation::Invalid(InvalidSession::NotFound)
        );
        Ok(())
    }

    #[test]
    fn idle_status_flags_imminent_timeout() {
        let (_store, manager) = manager();
        let now = Utc::now();
        let session = stored_session(Uuid::new_v4(), now - ChronoDuration::minutes(57));
        let status = manager.idle_status(&session, now);
        assert!(status.expires_soon);
        assert_eq!(
            status.idle_expires_at,
            session.last_activity + ChronoDuration::minutes(60)
        );

        let fresh = stored_session(Uuid::new_v4(), now);
        assert!(!manager.idle_status(&fresh, now).expires_soon);
    }

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn insert(&self, _session: &Session) -> Result<()> {
            Err(anyhow!("database unavailable"))
        }
        async fn find(&self, _id: Uuid) -> Result<Option<Session>> {
            Err(anyhow!("database unavailable"))
        }
        async fn list_active(&self, _user_id: Uuid) -> Result<Vec<Session>> {
            Err(anyhow!("database unavailable"))
        }
        async fn revoke(
            &self,
            _id: Uuid,
            _owner: Option<Uuid>,
            _reason: RevokeReason,
            _at: DateTime<Utc>,
        ) -> Result<bool> {
            Err(anyhow!("database unavailable"))
        }
        async fn revoke_all_except(
            &self,
            _user_id: Uuid,
            _keep: Uuid,
            _reason: RevokeReason,
            _at: DateTime<Utc>,
        ) -> Result<u64> {
            Err(anyhow!("database unavailable"))
        }
        async fn revoke_beyond(
            &self,
            _user_id: Uuid,
            _retain: usize,
            _reason: RevokeReason,
            _at: DateTime<Utc>,
        ) -> Result<u64> {
            Err(anyhow!("database unavailable"))
        }
        async fn touch(&self, _id: Uuid, _at: DateTime<Utc>) -> Result<()> {
            Err(anyhow!("database unavailable"))
        }
        async fn revoke_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
            Err(anyhow!("database unavailable"))
        }
    }

    /// Delegates to the in-memory store except for `touch`, which fails or never completes.
    struct StuckTouchStore {
        inner: Arc<MemorySessionStore>,
        hang: bool,
    }

    #[async_trait]
    impl SessionStore for StuckTouchStore {
        async fn insert(&self, session: &Session) -> Result<()> {
            self.inner.insert(session).await
        }
        async fn find(&self, id: Uuid) -> Result<Option<Session>> {
            self.inner.find(id).await
        }
        async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>> {
            self.inner.list_active(user_id).await
        }
        async fn revoke(
            &self,
            id: Uuid,
            owner: Option<Uuid>,
            reason: RevokeReason,
            at: DateTime<Utc>,
        ) -> Result<bool> {
            self.inner.revoke(id, owner, reason, at).await
        }
        async fn revoke_all_except(
            &self,
            user_id: Uuid,
            keep: Uuid,
            reason: RevokeReason,
            at: DateTime<Utc>,
        ) -> Result<u64> {
            self.inner.revoke_all_except(user_id, keep, reason, at).await
        }
        async fn revoke_beyond(
            &self,
            user_id: Uuid,
            retain: usize,
            reason: RevokeReason,
            at: DateTime<Utc>,
        ) -> Result<u64> {
            self.inner.revoke_beyond(user_id, retain, reason, at).await
        }
        async fn touch(&self, _id: Uuid, _at: DateTime<Utc>) -> Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Err(anyhow!("database unavailable"))
        }
        async fn revoke_expired(&self, now: DateTime<Utc>) -> Result<u64> {
            self.inner.revoke_expired(now).await
        }
    }

    async fn assert_refresh_failure_keeps_session(hang: bool) -> Result<()> {
        let inner = Arc::new(MemorySessionStore::new());
        let store = StuckTouchStore {
            inner: inner.clone(),
            hang,
        };
        let manager = SessionManager::new(
            Arc::new(store),
            SessionConfig::default().with_store_timeout(Duration::from_millis(100)),
        );
        let stale = Utc::now() - ChronoDuration::hours(2);
        let session = stored_session(Uuid::new_v4(), stale);
        inner.insert(&session).await?;

        match manager.validate_session(session.id).await? {
            SessionValidation::Valid {
                session: validated,
                needs_refresh,
            } => {
                assert!(needs_refresh);
                assert_eq!(validated.last_activity, stale);
            }
            other => panic!("expected a valid session, got {other:?}"),
        }

        let stored = inner.find(session.id).await?.ok_or_else(|| anyhow!("missing"))?;
        assert!(stored.is_active);
        assert_eq!(stored.last_activity, stale);
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_keeps_session_valid() -> Result<()> {
        assert_refresh_failure_keeps_session(false).await
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_refresh_keeps_session_valid() -> Result<()> {
        assert_refresh_failure_keeps_session(true).await
    }

    #[tokio::test]
    async fn store_failures_fail_closed() {
        let manager = SessionManager::new(Arc::new(BrokenStore), SessionConfig::default());
        assert!(
            manager
                .create_session(Uuid::new_v4(), None, None, None)
                .await
                .is_err()
        );
        assert!(manager.validate_session(Uuid::new_v4()).await.is_err());
        assert!(manager.cleanup_expired_sessions().await.is_err());
    }
}
