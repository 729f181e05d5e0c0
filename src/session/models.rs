use super::device::DeviceInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a session stopped being active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    /// The owner signed the session out.
    UserRevoked,
    /// The owner signed out everywhere else.
    RevokedOthers,
    /// Evicted by the per-user active session cap.
    MaxSessions,
    Expired,
}

impl RevokeReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRevoked => "user_revoked",
            Self::RevokedOthers => "revoked_others",
            Self::MaxSessions => "max_sessions",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for RevokeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevokeReason {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user_revoked" => Ok(Self::UserRevoked),
            "revoked_others" => Ok(Self::RevokedOthers),
            "max_sessions" => Ok(Self::MaxSessions),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown revoke reason: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device: DeviceInfo,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoke_reason: Option<RevokeReason>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Returned to the caller that authenticated the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidSession {
    NotFound,
    Inactive,
    Expired,
}

impl InvalidSession {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionValidation {
    Valid {
        session: Session,
        /// Last activity was stale; a refresh was attempted.
        needs_refresh: bool,
    },
    Invalid(InvalidSession),
}

impl SessionValidation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Valid { session, .. } => Some(session.user_id),
            Self::Invalid(_) => None,
        }
    }

    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        matches!(
            self,
            Self::Valid {
                needs_refresh: true,
                ..
            }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    /// Unknown id, someone else's session, or already inactive.
    NotFound,
}

/// Active session as shown in the "where you're signed in" list.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub device: DeviceInfo,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current: bool,
}

impl SessionSummary {
    #[must_use]
    pub fn from_session(session: &Session, current_id: Uuid) -> Self {
        Self {
            id: session.id.to_string(),
            device: session.device.clone(),
            ip_address: session.ip_address.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
            current: session.id == current_id,
        }
    }
}
