//! Response security headers, header auditing and CSP report intake.
//!
//! [`SecurityHeaders`] is applied to every response by the headers
//! middleware. A header already set by a handler is left untouched.

mod audit;
mod csp;
mod report;

pub use audit::{AuditSeverity, HEADER_WEIGHTS, HeaderAudit, SecurityAuditResult, get_security_score};
pub use csp::{CSP_REPORT_PATH, CspBuilder, CspIssue, CspProblem, validate_csp};
pub use report::{
    CspReport, CspReportEnvelope, CspViolation, ViolationSeverity, classify_directive,
    log_violation, process_report,
};

use anyhow::{Context, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

pub const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
pub const PERMISSIONS_POLICY_VALUE: &str =
    "camera=(), microphone=(), geolocation=(), payment=(), usb=()";

#[derive(Clone, Debug)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self {
            headers: vec![
                (
                    header::CONTENT_SECURITY_POLICY,
                    csp_value(&CspBuilder::default()),
                ),
                (
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static(HSTS_VALUE),
                ),
                (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
                (
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ),
                (
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ),
                (
                    HeaderName::from_static("permissions-policy"),
                    HeaderValue::from_static(PERMISSIONS_POLICY_VALUE),
                ),
                (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
            ],
        }
    }
}

fn csp_value(builder: &CspBuilder) -> HeaderValue {
    // Directive names and the default sources are plain ASCII.
    HeaderValue::from_str(&builder.build())
        .unwrap_or_else(|_| HeaderValue::from_static("default-src 'self'"))
}

impl SecurityHeaders {
    /// Replace the Content-Security-Policy.
    ///
    /// # Errors
    /// Returns an error if the rendered policy is not a valid header value.
    pub fn with_csp(mut self, csp: &CspBuilder) -> Result<Self> {
        let value = HeaderValue::from_str(&csp.build()).context("invalid CSP header value")?;
        self.set(header::CONTENT_SECURITY_POLICY, value);
        Ok(self)
    }

    /// Add or replace any header in the set.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.set(name, value);
        self
    }

    fn set(&mut self, name: HeaderName, value: HeaderValue) {
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Insert every header missing from `headers`.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter().map(|(name, value)| (name, value))
    }

    /// Audit the headers this set emits.
    #[must_use]
    pub fn audit(&self) -> SecurityAuditResult {
        let mut headers = HeaderMap::new();
        self.apply(&mut headers);
        get_security_score(&headers)
    }
}
