use super::models::{AuditEntry, TwoFactorEnrollment, TwoFactorState};
use super::repo::{TwoFactorStore, can_replace};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-process store for development and tests.
///
/// The mutex makes each conditional write atomic, matching the guarded
/// `UPDATE ... WHERE` statements of the `PostgreSQL` store.
#[derive(Debug, Default)]
pub struct MemoryTwoFactorStore {
    enrollments: Mutex<HashMap<Uuid, TwoFactorEnrollment>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryTwoFactorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries recorded so far, oldest first.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().await.clone()
    }
}

#[async_trait]
impl TwoFactorStore for MemoryTwoFactorStore {
    async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorEnrollment>> {
        Ok(self.enrollments.lock().await.get(&user_id).cloned())
    }

    async fn upsert_pending(
        &self,
        user_id: Uuid,
        secret: &str,
        backup_code_hashes: &[String],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut enrollments = self.enrollments.lock().await;
        if let Some(existing) = enrollments.get(&user_id)
            && !can_replace(existing.state)
        {
            return Ok(false);
        }
        enrollments.insert(
            user_id,
            TwoFactorEnrollment {
                user_id,
                secret: Some(secret.to_string()),
                backup_code_hashes: backup_code_hashes.to_vec(),
                state: TwoFactorState::Pending,
                created_at: at,
                enabled_at: None,
                disabled_at: None,
            },
        );
        Ok(true)
    }

    async fn enable(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut enrollments = self.enrollments.lock().await;
        match enrollments.get_mut(&user_id) {
            Some(enrollment) if enrollment.state == TwoFactorState::Pending => {
                enrollment.state = TwoFactorState::Enabled;
                enrollment.enabled_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn disable(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut enrollments = self.enrollments.lock().await;
        match enrollments.get_mut(&user_id) {
            Some(enrollment) if enrollment.state == TwoFactorState::Enabled => {
                enrollment.state = TwoFactorState::Disabled;
                enrollment.disabled_at = Some(at);
                enrollment.secret = None;
                enrollment.backup_code_hashes.clear();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_backup_code(&self, user_id: Uuid, code_hash: &str) -> Result<bool> {
        let mut enrollments = self.enrollments.lock().await;
        let Some(enrollment) = enrollments
            .get_mut(&user_id)
            .filter(|enrollment| enrollment.state == TwoFactorState::Enabled)
        else {
            return Ok(false);
        };
        let before = enrollment.backup_code_hashes.len();
        enrollment
            .backup_code_hashes
            .retain(|hash| hash.as_str() != code_hash);
        Ok(enrollment.backup_code_hashes.len() < before)
    }

    async fn replace_backup_codes(&self, user_id: Uuid, code_hashes: &[String]) -> Result<bool> {
        let mut enrollments = self.enrollments.lock().await;
        match enrollments.get_mut(&user_id) {
            Some(enrollment) if enrollment.state == TwoFactorState::Enabled => {
                enrollment.backup_code_hashes = code_hashes.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_attempt(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.lock().await.push(entry.clone());
        Ok(())
    }
}
