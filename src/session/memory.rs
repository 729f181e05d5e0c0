use super::models::{RevokeReason, Session};
use super::repo::SessionStore;
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-process session store for development and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn revoke_in_place(session: &mut Session, reason: RevokeReason, at: DateTime<Utc>) {
    session.is_active = false;
    session.revoked_at = Some(at);
    session.revoke_reason = Some(reason);
}

fn by_recent_activity(a: &Session, b: &Session) -> std::cmp::Ordering {
    b.last_activity
        .cmp(&a.last_activity)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.id) {
            bail!("duplicate session id");
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock().await;
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|session| session.user_id == user_id && session.is_active)
            .cloned()
            .collect();
        active.sort_by(by_recent_activity);
        Ok(active)
    }

    async fn revoke(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&id) {
            Some(session)
                if session.is_active && owner.is_none_or(|owner| owner == session.user_id) =>
            {
                revoke_in_place(session, reason, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_except(
        &self,
        user_id: Uuid,
        keep: Uuid,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.id != keep && session.is_active {
                revoke_in_place(session, reason, at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_beyond(
        &self,
        user_id: Uuid,
        retain: usize,
        reason: RevokeReason,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let mut active: Vec<&Session> = sessions
            .values()
            .filter(|session| session.user_id == user_id && session.is_active)
            .collect();
        active.sort_by(|a, b| by_recent_activity(a, b));
        let evicted: Vec<Uuid> = active.iter().skip(retain).map(|session| session.id).collect();

        let mut revoked = 0;
        for id in evicted {
            if let Some(session) = sessions.get_mut(&id) {
                revoke_in_place(session, reason, at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&id)
            && session.is_active
        {
            session.last_activity = at;
        }
        Ok(())
    }

    async fn revoke_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.is_active && session.expires_at < now {
                revoke_in_place(session, RevokeReason::Expired, now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
