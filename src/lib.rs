//! # Guardia (Security Control Plane)
//!
//! `guardia` bundles the request-level protections a web application puts in
//! front of its authenticated API: rate limiting, CSRF protection, session
//! lifecycle, TOTP two-factor authentication and security response headers.
//!
//! ## Request pipeline
//!
//! Every request passes, in order, through security headers, rate limiting
//! and CSRF validation before reaching a handler. Handlers receive the
//! services as `Extension<Arc<...>>`; nothing is held in globals.
//!
//! - **Rate limiting** counts per client in fixed windows (Redis `INCR` +
//!   `PEXPIRE`). It fails open: a store outage never blocks traffic.
//! - **CSRF** uses the double-submit pattern with an HMAC-bound cookie triple
//!   `{token, hash, timestamp}` valid for 24 hours.
//! - **Sessions** live in PostgreSQL, are capped at ten per user and fail
//!   closed: any store error means the session is not valid.
//! - **Two-factor** enrollment is a small state machine (none, pending,
//!   enabled). Backup codes are stored hashed and consumed atomically.
//!
//! ## Headers
//!
//! The emitted header set can be scored with
//! [`headers::get_security_score`]; CSP violation reports are accepted at
//! `/api/security/csp-report` and logged by severity.

pub mod api;
pub mod cli;
pub mod csrf;
pub mod headers;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod two_factor;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
