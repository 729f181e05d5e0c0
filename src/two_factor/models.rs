use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TwoFactorState {
    Pending,
    Enabled,
    Disabled,
}

impl TwoFactorState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

impl FromStr for TwoFactorState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown two-factor state: {other}")),
        }
    }
}

/// Stored enrollment. Backup codes are keyed HMAC-SHA256 digests, never plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct TwoFactorEnrollment {
    pub user_id: Uuid,
    /// Base32 TOTP secret; purged on disable.
    pub secret: Option<String>,
    pub backup_code_hashes: Vec<String>,
    pub state: TwoFactorState,
    pub created_at: DateTime<Utc>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for TwoFactorEnrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoFactorEnrollment")
            .field("user_id", &self.user_id)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("backup_codes", &self.backup_code_hashes.len())
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("enabled_at", &self.enabled_at)
            .field("disabled_at", &self.disabled_at)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationMethod {
    Totp,
    BackupCode,
    /// Nothing matched.
    None,
}

impl VerificationMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::BackupCode => "backup_code",
            Self::None => "none",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TwoFactorAction {
    Enable,
    Verify,
    Disable,
    Regenerate,
}

impl TwoFactorAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Verify => "verify",
            Self::Disable => "disable",
            Self::Regenerate => "regenerate",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEntry {
    pub user_id: Uuid,
    pub action: TwoFactorAction,
    pub method: VerificationMethod,
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Returned once, to the enrolling user only.
#[derive(Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetupResult {
    pub secret: String,
    /// PNG data URL of the provisioning QR code.
    pub qr_code_url: String,
    pub otpauth_url: String,
    pub backup_codes: Vec<String>,
}

impl fmt::Debug for SetupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupResult")
            .field("secret", &"***")
            .field("backup_codes", &self.backup_codes.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub success: bool,
    pub backup_code_used: bool,
}

impl VerifyOutcome {
    pub(crate) fn from_method(method: VerificationMethod) -> Self {
        Self {
            success: method != VerificationMethod::None,
            backup_code_used: method == VerificationMethod::BackupCode,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorStatus {
    pub is_enabled: bool,
    pub has_backup_codes: bool,
    pub backup_codes_remaining: usize,
}
