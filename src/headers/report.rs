//! CSP violation report intake.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

const EXTENSION_SCHEMES: [&str; 5] = [
    "chrome-extension",
    "moz-extension",
    "safari-extension",
    "safari-web-extension",
    "ms-browser-extension",
];

const HIGH_SEVERITY: [&str; 4] = ["script-src", "object-src", "base-uri", "form-action"];
const MEDIUM_SEVERITY: [&str; 4] = ["default-src", "connect-src", "frame-src", "frame-ancestors"];

/// Browser payload: `{"csp-report": {...}}`.
#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct CspReportEnvelope {
    #[serde(rename = "csp-report")]
    pub report: CspReport,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct CspReport {
    pub document_uri: Option<String>,
    pub referrer: Option<String>,
    pub violated_directive: Option<String>,
    pub effective_directive: Option<String>,
    pub original_policy: Option<String>,
    pub blocked_uri: Option<String>,
    pub source_file: Option<String>,
    pub line_number: Option<u64>,
    pub column_number: Option<u64>,
    pub status_code: Option<u16>,
    pub disposition: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
}

impl ViolationSeverity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CspViolation {
    pub directive: String,
    pub severity: ViolationSeverity,
    pub blocked_uri: Option<String>,
    pub document_uri: Option<String>,
}

impl CspReport {
    /// Violations caused by browser extensions, not by the page.
    #[must_use]
    pub fn is_extension_noise(&self) -> bool {
        [&self.blocked_uri, &self.source_file]
            .into_iter()
            .flatten()
            .any(|uri| is_extension_uri(uri))
    }

    /// Directive that was violated, normalised (`script-src-elem` -> `script-src`).
    #[must_use]
    pub fn directive(&self) -> Option<String> {
        let raw = self
            .effective_directive
            .as_deref()
            .or(self.violated_directive.as_deref())?;
        // Older browsers send the whole directive value in violated-directive.
        let name = raw.split_whitespace().next()?.to_ascii_lowercase();
        let name = name
            .strip_suffix("-elem")
            .or_else(|| name.strip_suffix("-attr"))
            .map_or_else(|| name.clone(), str::to_string);
        Some(name)
    }
}

fn is_extension_uri(uri: &str) -> bool {
    let lowered = uri.trim().to_ascii_lowercase();
    EXTENSION_SCHEMES.iter().any(|scheme| {
        lowered
            .strip_prefix(scheme)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}

#[must_use]
pub fn classify_directive(directive: &str) -> ViolationSeverity {
    if HIGH_SEVERITY.contains(&directive) {
        ViolationSeverity::High
    } else if MEDIUM_SEVERITY.contains(&directive) {
        ViolationSeverity::Medium
    } else {
        ViolationSeverity::Low
    }
}

/// Filter and classify a report. `None` for extension noise.
#[must_use]
pub fn process_report(report: &CspReport) -> Option<CspViolation> {
    if report.is_extension_noise() {
        return None;
    }
    let directive = report.directive().unwrap_or_else(|| "unknown".to_string());
    Some(CspViolation {
        severity: classify_directive(&directive),
        directive,
        blocked_uri: report.blocked_uri.clone(),
        document_uri: report.document_uri.clone(),
    })
}

/// High severity is logged at error level, the rest at warn.
pub fn log_violation(violation: &CspViolation) {
    let blocked_uri = violation.blocked_uri.as_deref().unwrap_or("");
    let document_uri = violation.document_uri.as_deref().unwrap_or("");
    if violation.severity == ViolationSeverity::High {
        error!(
            directive = %violation.directive,
            severity = violation.severity.as_str(),
            blocked_uri,
            document_uri,
            "CSP violation"
        );
    } else {
        warn!(
            directive = %violation.directive,
            severity = violation.severity.as_str(),
            blocked_uri,
            document_uri,
            "CSP violation"
        );
    }
}
