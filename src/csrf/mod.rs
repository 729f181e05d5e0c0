//! Stateless CSRF tokens (double-submit cookie).
//!
//! Flow Overview:
//! 1) `GET /api/csrf-token` issues `{token, hash, timestamp}`; the triple goes
//!    into the `csrf-token` cookie and the bare token back to the client.
//! 2) State-changing requests echo the token in `x-csrf-token`.
//! 3) The server checks header token == cookie token, recomputes the MAC over
//!    `token.timestamp` and rejects triples older than 24 hours.
//!
//! Nothing is stored server-side; the only state is the process-wide secret.
//!
//! Security boundary: a request is never allowed on a parse failure. Missing
//! header, missing cookie and malformed cookie are all rejections.

mod cookie;

pub use cookie::{csrf_cookie, decode_cookie_value, encode_cookie_value};

use crate::api::utils::cookie_value;
use anyhow::{Context, Result, bail};
use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_COOKIE: &str = "csrf-token";

/// Token lifetime in milliseconds (24 hours).
pub const TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Issued-at values further in the future than this are rejected.
const FUTURE_SKEW_MS: i64 = 5 * 60 * 1000;

const DEFAULT_EXEMPT_PREFIXES: [&str; 2] = ["/api/auth/callback", "/api/security/csp-report"];

/// The triple carried by the `csrf-token` cookie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub token: String,
    pub hash: String,
    /// Issue time in Unix milliseconds.
    pub timestamp: i64,
}

impl CsrfToken {
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp.checked_add(TOKEN_TTL_MS)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrfRejection {
    MissingHeader,
    MissingCookie,
    MalformedCookie,
    TokenMismatch,
    InvalidToken,
}

impl CsrfRejection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MissingCookie => "missing_cookie",
            Self::MalformedCookie => "malformed_cookie",
            Self::TokenMismatch => "token_mismatch",
            Self::InvalidToken => "invalid_token",
        }
    }

    /// Client-facing message; never echoes token material.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingHeader | Self::MissingCookie => "CSRF token missing",
            Self::MalformedCookie | Self::TokenMismatch | Self::InvalidToken => {
                "CSRF token invalid or expired"
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrfDecision {
    /// Safe method or exempt path; no token required.
    Exempt,
    Valid,
    Rejected(CsrfRejection),
}

impl CsrfDecision {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Exempt | Self::Valid)
    }
}

#[derive(Clone, Debug)]
pub struct CsrfConfig {
    exempt_prefixes: Vec<String>,
    secure_cookie: bool,
    #[cfg(debug_assertions)]
    dev_bypass: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            exempt_prefixes: DEFAULT_EXEMPT_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            secure_cookie: true,
            #[cfg(debug_assertions)]
            dev_bypass: false,
        }
    }
}

impl CsrfConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default exempt path prefixes.
    #[must_use]
    pub fn with_exempt_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.exempt_prefixes = prefixes;
        self
    }

    /// Whether the `csrf-token` cookie carries `Secure`. Off only for plain-http origins.
    #[must_use]
    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure_cookie = secure;
        self
    }

    #[must_use]
    pub fn secure_cookie(&self) -> bool {
        self.secure_cookie
    }

    /// Skip validation entirely. Only compiled into debug builds.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn with_dev_bypass(mut self, bypass: bool) -> Self {
        self.dev_bypass = bypass;
        self
    }

    #[must_use]
    pub fn exempt_prefixes(&self) -> &[String] {
        &self.exempt_prefixes
    }

    fn bypass(&self) -> bool {
        #[cfg(debug_assertions)]
        {
            self.dev_bypass
        }
        #[cfg(not(debug_assertions))]
        {
            false
        }
    }
}

pub struct CsrfService {
    secret: SecretString,
    config: CsrfConfig,
}

impl std::fmt::Debug for CsrfService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfService")
            .field("secret", &"***")
            .field("config", &self.config)
            .finish()
    }
}

impl CsrfService {
    /// # Errors
    /// Returns an error if the secret is empty.
    pub fn new(secret: SecretString, config: CsrfConfig) -> Result<Self> {
        if secret.expose_secret().trim().is_empty() {
            bail!("CSRF secret must not be empty");
        }
        Ok(Self { secret, config })
    }

    #[must_use]
    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// Issue a fresh token triple.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn issue(&self) -> Result<CsrfToken> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate CSRF token")?;
        let token = hex::encode(bytes);
        let timestamp = Utc::now().timestamp_millis();
        let hash = self.sign(&token, timestamp)?;
        Ok(CsrfToken {
            token,
            hash,
            timestamp,
        })
    }

    /// Check a triple against the secret and the 24 hour lifetime.
    #[must_use]
    pub fn verify(&self, token: &str, hash: &str, timestamp: i64) -> bool {
        self.verify_at(token, hash, timestamp, Utc::now().timestamp_millis())
    }

    fn verify_at(&self, token: &str, hash: &str, timestamp: i64, now_ms: i64) -> bool {
        if token.is_empty() || hash.is_empty() || timestamp <= 0 {
            return false;
        }
        let age = now_ms.saturating_sub(timestamp);
        if age > TOKEN_TTL_MS || age < -FUTURE_SKEW_MS {
            return false;
        }
        let Ok(expected) = self.sign(token, timestamp) else {
            return false;
        };
        expected.as_bytes().ct_eq(hash.as_bytes()).into()
    }

    /// Decide whether a request may proceed.
    #[must_use]
    pub fn validate_request(&self, method: &Method, path: &str, headers: &HeaderMap) -> CsrfDecision {
        if [Method::GET, Method::HEAD, Method::OPTIONS].contains(method) {
            return CsrfDecision::Exempt;
        }
        if self
            .config
            .exempt_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return CsrfDecision::Exempt;
        }
        if self.config.bypass() {
            warn!(path, "CSRF validation bypassed (development mode)");
            return CsrfDecision::Exempt;
        }

        let decision = self.check_tokens(headers);
        if let CsrfDecision::Rejected(reason) = decision {
            debug!(path, method = %method, reason = reason.as_str(), "CSRF validation failed");
        }
        decision
    }

    fn check_tokens(&self, headers: &HeaderMap) -> CsrfDecision {
        let Some(header_token) = headers
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return CsrfDecision::Rejected(CsrfRejection::MissingHeader);
        };

        let Some(raw_cookie) = cookie_value(headers, CSRF_COOKIE) else {
            return CsrfDecision::Rejected(CsrfRejection::MissingCookie);
        };

        let Some(cookie) = decode_cookie_value(&raw_cookie) else {
            return CsrfDecision::Rejected(CsrfRejection::MalformedCookie);
        };

        if !bool::from(header_token.as_bytes().ct_eq(cookie.token.as_bytes())) {
            return CsrfDecision::Rejected(CsrfRejection::TokenMismatch);
        }

        if self.verify(&cookie.token, &cookie.hash, cookie.timestamp) {
            CsrfDecision::Valid
        } else {
            CsrfDecision::Rejected(CsrfRejection::InvalidToken)
        }
    }

    // The MAC covers the issue time so a captured triple cannot be re-dated.
    fn sign(&self, token: &str, timestamp: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .context("invalid CSRF secret")?;
        mac.update(token.as_bytes());
        mac.update(b".");
        mac.update(timestamp.to_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
