use super::codes::{
    TOTP_DIGITS, build_totp, generate_backup_codes, generate_secret, hash_backup_code,
    normalize_token, verify_totp_at,
};
use super::models::{
    AuditEntry, SetupResult, TwoFactorAction, TwoFactorEnrollment, TwoFactorState,
    TwoFactorStatus, VerificationMethod, VerifyOutcome,
};
use super::repo::TwoFactorStore;
use crate::store::{self, DEFAULT_STORE_TIMEOUT, StoreError};
use anyhow::anyhow;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_ISSUER: &str = "Guardia";

#[derive(Debug, thiserror::Error)]
pub enum TwoFactorError {
    #[error("two-factor authentication is already enabled")]
    AlreadyEnabled,
    #[error("no pending two-factor setup")]
    NotPending,
    #[error("two-factor authentication is not enabled")]
    NotEnabled,
    #[error("invalid verification code")]
    InvalidToken,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to provision two-factor secret: {0}")]
    Provisioning(#[source] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct TwoFactorConfig {
    issuer: String,
    store_timeout: Duration,
    backup_code_key: SecretString,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            backup_code_key: SecretString::from(String::new()),
        }
    }
}

impl TwoFactorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Key for the backup code digests. Changing it invalidates every stored code.
    #[must_use]
    pub fn with_backup_code_key(mut self, key: SecretString) -> Self {
        self.backup_code_key = key;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn backup_code_key(&self) -> &SecretString {
        &self.backup_code_key
    }
}

/// TOTP enrollment and verification.
///
/// Failure policy: fail closed. A store error or timeout surfaces as
/// [`TwoFactorError::Store`] and never as a successful verification. Audit
/// writes are best-effort.
pub struct TwoFactorService {
    store: Arc<dyn TwoFactorStore>,
    config: TwoFactorConfig,
}

impl TwoFactorService {
    #[must_use]
    pub fn new(store: Arc<dyn TwoFactorStore>, config: TwoFactorConfig) -> Self {
        Self { store, config }
    }

    /// Start (or restart) enrollment.
    ///
    /// Returns the plaintext secret, QR code and backup codes. This is the only
    /// time the backup codes exist in plaintext.
    ///
    /// # Errors
    /// [`TwoFactorError::AlreadyEnabled`] if the user is enrolled, otherwise store
    /// or provisioning failures.
    pub async fn setup(
        &self,
        user_id: Uuid,
        account_label: &str,
    ) -> Result<SetupResult, TwoFactorError> {
        if let Some(existing) = self.load(user_id).await?
            && existing.state == TwoFactorState::Enabled
        {
            return Err(TwoFactorError::AlreadyEnabled);
        }

        let secret = generate_secret().map_err(TwoFactorError::Provisioning)?;
        let totp = build_totp(secret, &self.config.issuer, account_label)
            .map_err(TwoFactorError::Provisioning)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| TwoFactorError::Provisioning(anyhow!("QR gen error: {e}")))?;
        let qr_code_url = format!("data:image/png;base64,{qr}");
        let otpauth_url = totp.get_url();
        let secret = totp.get_secret_base32();

        let backup_codes = generate_backup_codes().map_err(TwoFactorError::Provisioning)?;
        let hashes = self.hash_codes(user_id, &backup_codes)?;

        let stored = store::bounded(
            "two_factor.upsert_pending",
            self.config.store_timeout,
            self.store
                .upsert_pending(user_id, &secret, &hashes, Utc::now()),
        )
        .await?;
        if !stored {
            return Err(TwoFactorError::AlreadyEnabled);
        }

        info!(user_id = %user_id, "two-factor setup started");
        Ok(SetupResult {
            secret,
            qr_code_url,
            otpauth_url,
            backup_codes,
        })
    }

    /// Confirm a pending enrollment with a TOTP code.
    ///
    /// # Errors
    /// [`TwoFactorError::NotPending`] without a pending enrollment,
    /// [`TwoFactorError::InvalidToken`] when the code does not match.
    pub async fn enable(&self, user_id: Uuid, token: &str) -> Result<(), TwoFactorError> {
        let enrollment = self
            .load(user_id)
            .await?
            .filter(|enrollment| enrollment.state == TwoFactorState::Pending)
            .ok_or(TwoFactorError::NotPending)?;

        let token = normalize_token(token);
        let valid = enrollment
            .secret
            .as_deref()
            .is_some_and(|secret| verify_totp_at(secret, &token, now_unix()));
        if !valid {
            self.audit(user_id, TwoFactorAction::Enable, VerificationMethod::None)
                .await;
            warn!(user_id = %user_id, "two-factor enable rejected: invalid code");
            return Err(TwoFactorError::InvalidToken);
        }

        let enabled = store::bounded(
            "two_factor.enable",
            self.config.store_timeout,
            self.store.enable(user_id, Utc::now()),
        )
        .await?;
        if !enabled {
            return Err(TwoFactorError::NotPending);
        }

        self.audit(user_id, TwoFactorAction::Enable, VerificationMethod::Totp)
            .await;
        info!(user_id = %user_id, "two-factor enabled");
        Ok(())
    }

    /// Verify a TOTP code or consume a backup code.
    ///
    /// # Errors
    /// [`TwoFactorError::NotEnabled`] without an enabled enrollment, or a store failure.
    pub async fn verify(&self, user_id: Uuid, token: &str) -> Result<VerifyOutcome, TwoFactorError> {
        self.verify_for(user_id, token, TwoFactorAction::Verify)
            .await
            .map(VerifyOutcome::from_method)
    }

    /// Disable after a successful verification; the secret and codes are purged.
    ///
    /// # Errors
    /// [`TwoFactorError::InvalidToken`] leaves the enrollment enabled.
    pub async fn disable(&self, user_id: Uuid, token: &str) -> Result<(), TwoFactorError> {
        let method = self
            .verify_for(user_id, token, TwoFactorAction::Disable)
            .await?;
        if method == VerificationMethod::None {
            return Err(TwoFactorError::InvalidToken);
        }

        let disabled = store::bounded(
            "two_factor.disable",
            self.config.store_timeout,
            self.store.disable(user_id, Utc::now()),
        )
        .await?;
        if !disabled {
            return Err(TwoFactorError::NotEnabled);
        }
        info!(user_id = %user_id, "two-factor disabled");
        Ok(())
    }

    /// Replace every backup code after a successful verification.
    ///
    /// # Errors
    /// [`TwoFactorError::InvalidToken`] leaves the existing codes in place.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<Vec<String>, TwoFactorError> {
        let method = self
            .verify_for(user_id, token, TwoFactorAction::Regenerate)
            .await?;
        if method == VerificationMethod::None {
            return Err(TwoFactorError::InvalidToken);
        }

        let codes = generate_backup_codes().map_err(TwoFactorError::Provisioning)?;
        let hashes = self.hash_codes(user_id, &codes)?;
        let replaced = store::bounded(
            "two_factor.replace_backup_codes",
            self.config.store_timeout,
            self.store.replace_backup_codes(user_id, &hashes),
        )
        .await?;
        if !replaced {
            return Err(TwoFactorError::NotEnabled);
        }
        info!(user_id = %user_id, "backup codes regenerated");
        Ok(codes)
    }

    /// # Errors
    /// Returns a store failure.
    pub async fn status(&self, user_id: Uuid) -> Result<TwoFactorStatus, TwoFactorError> {
        let enrollment = self.load(user_id).await?;
        let (is_enabled, remaining) = match enrollment {
            Some(enrollment) if enrollment.state == TwoFactorState::Enabled => {
                (true, enrollment.backup_code_hashes.len())
            }
            _ => (false, 0),
        };
        Ok(TwoFactorStatus {
            is_enabled,
            has_backup_codes: remaining > 0,
            backup_codes_remaining: remaining,
        })
    }

    async fn verify_for(
        &self,
        user_id: Uuid,
        token: &str,
        action: TwoFactorAction,
    ) -> Result<VerificationMethod, TwoFactorError> {
        let enrollment = self
            .load(user_id)
            .await?
            .filter(|enrollment| enrollment.state == TwoFactorState::Enabled)
            .ok_or(TwoFactorError::NotEnabled)?;

        let method = self.match_token(&enrollment, &normalize_token(token)).await?;
        self.audit(user_id, action, method).await;

        if method == VerificationMethod::None {
            warn!(user_id = %user_id, action = action.as_str(), "two-factor verification failed");
        } else {
            info!(
                user_id = %user_id,
                action = action.as_str(),
                method = method.as_str(),
                "two-factor verification succeeded"
            );
        }
        Ok(method)
    }

    async fn match_token(
        &self,
        enrollment: &TwoFactorEnrollment,
        token: &str,
    ) -> Result<VerificationMethod, TwoFactorError> {
        if token.is_empty() {
            return Ok(VerificationMethod::None);
        }

        if token.len() == TOTP_DIGITS
            && enrollment
                .secret
                .as_deref()
                .is_some_and(|secret| verify_totp_at(secret, token, now_unix()))
        {
            return Ok(VerificationMethod::Totp);
        }

        let code_hash = hash_backup_code(
            self.config.backup_code_key.expose_secret().as_bytes(),
            enrollment.user_id,
            token,
        )
        .map_err(TwoFactorError::Provisioning)?;
        // Conditional removal: only one concurrent caller can consume a code.
        let consumed = store::bounded(
            "two_factor.consume_backup_code",
            self.config.store_timeout,
            self.store.consume_backup_code(enrollment.user_id, &code_hash),
        )
        .await?;
        Ok(if consumed {
            VerificationMethod::BackupCode
        } else {
            VerificationMethod::None
        })
    }

    fn hash_codes(&self, user_id: Uuid, codes: &[String]) -> Result<Vec<String>, TwoFactorError> {
        let key = self.config.backup_code_key.expose_secret().as_bytes();
        codes
            .iter()
            .map(|code| hash_backup_code(key, user_id, code))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(TwoFactorError::Provisioning)
    }

    async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorEnrollment>, StoreError> {
        store::bounded(
            "two_factor.load",
            self.config.store_timeout,
            self.store.load(user_id),
        )
        .await
    }

    async fn audit(&self, user_id: Uuid, action: TwoFactorAction, method: VerificationMethod) {
        let entry = AuditEntry {
            user_id,
            action,
            method,
            success: method != VerificationMethod::None,
            at: Utc::now(),
        };
        store::best_effort(
            "two_factor.record_attempt",
            self.config.store_timeout,
            self.store.record_attempt(&entry),
        )
        .await;
    }
}

fn now_unix() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::two_factor::MemoryTwoFactorStore;
    use crate::two_factor::codes::decode_secret;
    use anyhow::Result;
    use async_trait::async_trait;

    fn service() -> (Arc<MemoryTwoFactorStore>, TwoFactorService) {
        let store = Arc::new(MemoryTwoFactorStore::new());
        let service = TwoFactorService::new(store.clone(), TwoFactorConfig::default());
        (store, service)
    }

    fn current_code(secret: &str) -> String {
        let totp = build_totp(decode_secret(secret).expect("secret"), "Guardia", "test")
            .expect("totp");
        totp.generate(now_unix())
    }

    async fn enrolled(service: &TwoFactorService, user_id: Uuid) -> Result<SetupResult> {
        let setup = service.setup(user_id, "alice@example.com").await?;
        service.enable(user_id, &current_code(&setup.secret)).await?;
        Ok(setup)
    }

    #[tokio::test]
    async fn setup_returns_provisioning_material() -> Result<()> {
        let (store, service) = service();
        let user_id = Uuid::new_v4();
        let setup = service.setup(user_id, "alice@example.com").await?;

        assert_eq!(decode_secret(&setup.secret)?.len(), 32);
        assert!(setup.qr_code_url.starts_with("data:image/png;base64,"));
        assert!(setup.otpauth_url.starts_with("otpauth://totp/"));
        assert!(setup.otpauth_url.contains("issuer=Guardia"));
        assert_eq!(setup.backup_codes.len(), 10);

        let stored = store.load(user_id).await?.expect("enrollment");
        assert_eq!(stored.state, TwoFactorState::Pending);
        // Only digests are persisted.
        for code in &setup.backup_codes {
            assert!(!stored.backup_code_hashes.contains(code));
            assert!(
                stored
                    .backup_code_hashes
                    .contains(&hash_backup_code(b"", user_id, code)?)
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn enable_requires_valid_code() -> Result<()> {
        let (_store, service) = service();
        let user_id = Uuid::new_v4();
        let setup = service.setup(user_id, "alice").await?;

        let wrong = if current_code(&setup.secret) == "000000" {
            "111111"
        } else {
            "000000"
        };
        assert!(matches!(
            service.enable(user_id, wrong).await,
            Err(TwoFactorError::InvalidToken)
        ));
        assert!(!service.status(user_id).await?.is_enabled);

        service.enable(user_id, &current_code(&setup.secret)).await?;
        assert!(service.status(user_id).await?.is_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn enable_without_setup_is_rejected() {
        let (_store, service) = service();
        assert!(matches!(
            service.enable(Uuid::new_v4(), "123456").await,
            Err(TwoFactorError::NotPending)
        ));
    }

    #[tokio::test]
    async fn setup_refused_once_enabled() -> Result<()> {
        let (_store, service) = service();
        let user_id = Uuid::new_v4();
        enrolled(&service, user_id).await?;
        assert!(matches!(
            service.setup(user_id, "alice").await,
            Err(TwoFactorError::AlreadyEnabled)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn repeated_setup_replaces_pending() -> Result<()> {
        let (store, service) = service();
        let user_id = Uuid::new_v4();
        let first = service.setup(user_id, "alice").await?;
        let second = service.setup(user_id, "alice").await?;
        assert_ne!(first.secret, second.secret);
        let stored = store.load(user_id).await?.expect("enrollment");
        assert_eq!(stored.secret.as_deref(), Some(second.secret.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn totp_verifies() -> Result<()> {
        let (_store, service) = service();
        let user_id = Uuid::new_v4();
        let setup = enrolled(&service, user_id).await?;
        let outcome = service
            .verify(user_id, &current_code(&setup.secret))
            .await?;
        assert_eq!(
            outcome,
            VerifyOutcome {
                success: true,
                backup_code_used: false
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn backup_code_is_single_use() -> Result<()> {
        let (store, service) = service();
        let user_id = Uuid::new_v4();
        let setup = enrolled(&service, user_id).await?;
        let code = setup.backup_codes[0].clone();

        let first = service.verify(user_id, &code).await?;
        assert!(first.success && first.backup_code_used);
        let second = service.verify(user_id, &code).await?;
        assert!(!second.success);

        let status = service.status(user_id).await?;
        assert_eq!(status.backup_codes_remaining, 9);

        let methods: Vec<_> = store
            .audit_entries()
            .await
            .into_iter()
            .filter(|entry| entry.action == TwoFactorAction::Verify)
            .map(|entry| (entry.method, entry.success))
            .collect();
        assert_eq!(
            methods,
            vec![
                (VerificationMethod::BackupCode, true),
                (VerificationMethod::None, false)
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn backup_code_accepts_lowercase_and_dashes() -> Result<()> {
        let (_store, service) = service();
        let user_id = Uuid::new_v4();
        let setup = enrolled(&service, user_id).await?;
        let code = setup.backup_codes[1].to_lowercase();
        let formatted = format!("{}-{}", &code[..4], &code[4..]);
        assert!(service.verify(user_id, &formatted).await?.backup_code_used);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_backup_code_use_succeeds_once() -> Result<()> {
        let (_store, service) = service();
        let service = Arc::new(service);
        let user_id = Uuid::new_v4();
        let setup = enrolled(&service, user_id).await?;
        let code = setup.backup_codes[2].clone();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move { service.verify(user_id, &code).await }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await??.success {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn verify_requires_enabled_enrollment() -> Result<()> {
        let (_store, service) = service();
        let user_id = Uuid::new_v4();
        service.setup(user_id, "alice").await?;
        assert!(matches!(
            service.verify(user_id, "123456").await,
            Err(TwoFactorError::NotEnabled)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn failed_disable_keeps_enrollment() -> Result<()> {
        let (_store, service) = service();
        let user_id = Uuid::new_v4();
        enrolled(&service, user_id).await?;

        assert!(matches!(
            service.disable(user_id, "ZZZZZZZZ").await,
            Err(TwoFactorError::InvalidToken)
        ));
        assert!(service.status(user_id).await?.is_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn disable_purges_secret_and_codes() -> Result<()> {
        let (store, service) = service();
        let user_id = Uuid::new_v4();
        let setup = enrolled(&service, user_id).await?;

        service.disable(user_id, &current_code(&setup.secret)).await?;
        let stored = store.load(user_id).await?.expect("enrollment");
        assert_eq!(stored.state, TwoFactorState::Disabled);
        assert_eq!(stored.secret, None);
        assert!(stored.backup_code_hashes.is_empty());
        assert!(!service.status(user_id).await?.is_enabled);

        // A fresh setup is allowed after disabling.
        service.setup(user_id, "alice").await?;
        Ok(())
    }

    #[tokio::test]
    async fn regenerate_replaces_all_codes() -> Result<()> {
        let (_store, service) = service();
        let user_id = Uuid::new_v4();
        let setup = enrolled(&service, user_id).await?;

        let fresh = service
            .regenerate_backup_codes(user_id, &setup.backup_codes[0])
            .await?;
        assert_eq!(fresh.len(), 10);
        assert_eq!(service.status(user_id).await?.backup_codes_remaining, 10);
        // Old codes no longer work.
        assert!(!service.verify(user_id, &setup.backup_codes[1]).await?.success);
        assert!(service.verify(user_id, &fresh[0]).await?.backup_code_used);
        Ok(())
    }

    #[tokio::test]
    async fn backup_codes_are_bound_to_server_key() -> Result<()> {
        let store = Arc::new(MemoryTwoFactorStore::new());
        let keyed = |key: &str| {
            TwoFactorService::new(
                store.clone(),
                TwoFactorConfig::default().with_backup_code_key(SecretString::from(key.to_string())),
            )
        };
        let original = keyed("first-key");
        let user_id = Uuid::new_v4();
        let setup = enrolled(&original, user_id).await?;

        let stored = store.load(user_id).await?.expect("enrollment");
        assert!(!stored.backup_code_hashes.contains(&hash_backup_code(
            b"",
            user_id,
            &setup.backup_codes[0]
        )?));

        let rotated = keyed("second-key");
        assert!(!rotated.verify(user_id, &setup.backup_codes[0]).await?.success);
        assert!(original.verify(user_id, &setup.backup_codes[0]).await?.backup_code_used);
        Ok(())
    }

    #[derive(Clone, Copy)]
    enum Fault {
        Fail,
        Hang,
    }

    /// Wraps the in-memory store; writes (and optionally reads) fail or never complete.
    struct FaultyStore {
        inner: Arc<MemoryTwoFactorStore>,
        fault: Fault,
        faulty_reads: bool,
    }

    impl FaultyStore {
        async fn inject(&self) -> Result<()> {
            match self.fault {
                Fault::Fail => Err(anyhow!("database unavailable")),
                Fault::Hang => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl TwoFactorStore for FaultyStore {
        async fn load(&self, user_id: Uuid) -> Result<Option<TwoFactorEnrollment>> {
            if self.faulty_reads {
                self.inject().await?;
            }
            self.inner.load(user_id).await
        }
        async fn upsert_pending(
            &self,
            user_id: Uuid,
            secret: &str,
            backup_code_hashes: &[String],
            at: chrono::DateTime<Utc>,
        ) -> Result<bool> {
            self.inject().await?;
            self.inner
                .upsert_pending(user_id, secret, backup_code_hashes, at)
                .await
        }
        async fn enable(&self, user_id: Uuid, at: chrono::DateTime<Utc>) -> Result<bool> {
            self.inject().await?;
            self.inner.enable(user_id, at).await
        }
        async fn disable(&self, user_id: Uuid, at: chrono::DateTime<Utc>) -> Result<bool> {
            self.inject().await?;
            self.inner.disable(user_id, at).await
        }
        async fn consume_backup_code(&self, user_id: Uuid, code_hash: &str) -> Result<bool> {
            self.inject().await?;
            self.inner.consume_backup_code(user_id, code_hash).await
        }
        async fn replace_backup_codes(&self, user_id: Uuid, code_hashes: &[String]) -> Result<bool> {
            self.inject().await?;
            self.inner.replace_backup_codes(user_id, code_hashes).await
        }
        async fn record_attempt(&self, entry: &AuditEntry) -> Result<()> {
            self.inner.record_attempt(entry).await
        }
    }

    fn faulty_service(
        inner: &Arc<MemoryTwoFactorStore>,
        fault: Fault,
        faulty_reads: bool,
    ) -> TwoFactorService {
        TwoFactorService::new(
            Arc::new(FaultyStore {
                inner: inner.clone(),
                fault,
                faulty_reads,
            }),
            TwoFactorConfig::default().with_store_timeout(Duration::from_millis(100)),
        )
    }

    #[tokio::test]
    async fn store_failures_fail_closed() -> Result<()> {
        let (store, healthy) = service();
        let user_id = Uuid::new_v4();
        let setup = enrolled(&healthy, user_id).await?;
        let code = current_code(&setup.secret);
        let broken = faulty_service(&store, Fault::Fail, true);

        assert!(matches!(
            broken.verify(user_id, &code).await,
            Err(TwoFactorError::Store(StoreError::Backend { .. }))
        ));
        assert!(matches!(
            broken.verify(user_id, &setup.backup_codes[0]).await,
            Err(TwoFactorError::Store(_))
        ));
        assert!(matches!(
            broken.disable(user_id, &code).await,
            Err(TwoFactorError::Store(_))
        ));
        assert!(matches!(
            broken.regenerate_backup_codes(user_id, &code).await,
            Err(TwoFactorError::Store(_))
        ));
        assert!(matches!(
            broken.status(user_id).await,
            Err(TwoFactorError::Store(_))
        ));
        assert!(matches!(
            broken.setup(Uuid::new_v4(), "bob").await,
            Err(TwoFactorError::Store(_))
        ));

        // Nothing was consumed or disabled behind the failures.
        let status = healthy.status(user_id).await?;
        assert!(status.is_enabled);
        assert_eq!(status.backup_codes_remaining, 10);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn store_timeouts_fail_closed() -> Result<()> {
        let (store, healthy) = service();
        let user_id = Uuid::new_v4();
        let setup = enrolled(&healthy, user_id).await?;
        let pending_user = Uuid::new_v4();
        let pending = healthy.setup(pending_user, "carol").await?;
        let stuck = faulty_service(&store, Fault::Hang, false);

        assert!(matches!(
            stuck.verify(user_id, &setup.backup_codes[0]).await,
            Err(TwoFactorError::Store(StoreError::Timeout { .. }))
        ));
        assert!(matches!(
            stuck.disable(user_id, &current_code(&setup.secret)).await,
            Err(TwoFactorError::Store(StoreError::Timeout { .. }))
        ));
        assert!(matches!(
            stuck.enable(pending_user, &current_code(&pending.secret)).await,
            Err(TwoFactorError::Store(StoreError::Timeout { .. }))
        ));

        assert!(healthy.status(user_id).await?.is_enabled);
        assert!(!healthy.status(pending_user).await?.is_enabled);

        let reads_stuck = faulty_service(&store, Fault::Hang, true);
        assert!(matches!(
            reads_stuck.verify(user_id, &current_code(&setup.secret)).await,
            Err(TwoFactorError::Store(StoreError::Timeout { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn status_for_unknown_user() -> Result<()> {
        let (_store, service) = service();
        assert_eq!(
            service.status(Uuid::new_v4()).await?,
            TwoFactorStatus {
                is_enabled: false,
                has_backup_codes: false,
                backup_codes_remaining: 0
            }
        );
        Ok(())
    }
}
