//! Weighted scoring of response security headers.

use super::csp::validate_csp;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

const HSTS_MIN_MAX_AGE: u64 = 31_536_000;

const STRICT_REFERRER_POLICIES: [&str; 4] = [
    "no-referrer",
    "same-origin",
    "strict-origin",
    "strict-origin-when-cross-origin",
];

/// Audited headers and their weight out of 100.
pub const HEADER_WEIGHTS: [(&str, u32); 7] = [
    ("content-security-policy", 25),
    ("strict-transport-security", 20),
    ("x-frame-options", 15),
    ("x-content-type-options", 10),
    ("referrer-policy", 10),
    ("permissions-policy", 10),
    ("x-xss-protection", 10),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Strong configuration.
    Info,
    /// Present but weak.
    Warning,
    /// Missing.
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct HeaderAudit {
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub severity: AuditSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SecurityAuditResult {
    pub timestamp: DateTime<Utc>,
    pub headers: BTreeMap<String, HeaderAudit>,
    /// 0 to 100.
    pub score: u8,
    pub recommendations: Vec<String>,
}

enum Grade {
    Strong,
    Weak(String),
}

/// Score the security headers in `headers`.
///
/// Strong configuration earns the full weight, weak configuration half and a
/// missing header nothing.
#[must_use]
pub fn get_security_score(headers: &HeaderMap) -> SecurityAuditResult {
    let mut audited = BTreeMap::new();
    let mut recommendations = Vec::new();
    let mut half_points = 0u32;

    for (name, weight) in HEADER_WEIGHTS {
        let value = headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let audit = match value {
            None => {
                let recommendation = missing_recommendation(name);
                recommendations.push(recommendation.clone());
                HeaderAudit {
                    present: false,
                    value: None,
                    severity: AuditSeverity::Critical,
                    recommendation: Some(recommendation),
                }
            }
            Some(value) => match grade(name, value) {
                Grade::Strong => {
                    half_points += weight * 2;
                    HeaderAudit {
                        present: true,
                        value: Some(value.to_string()),
                        severity: AuditSeverity::Info,
                        recommendation: None,
                    }
                }
                Grade::Weak(recommendation) => {
                    half_points += weight;
                    recommendations.push(recommendation.clone());
                    HeaderAudit {
                        present: true,
                        value: Some(value.to_string()),
                        severity: AuditSeverity::Warning,
                        recommendation: Some(recommendation),
                    }
                }
            },
        };
        audited.insert(name.to_string(), audit);
    }

    SecurityAuditResult {
        timestamp: Utc::now(),
        headers: audited,
        score: u8::try_from(half_points.div_ceil(2).min(100)).unwrap_or(100),
        recommendations,
    }
}

fn grade(name: &str, value: &str) -> Grade {
    let lowered = value.to_ascii_lowercase();
    match name {
        "content-security-policy" => {
            let issues: Vec<String> = validate_csp(value)
                .iter()
                .map(ToString::to_string)
                .collect();
            if issues.is_empty() {
                Grade::Strong
            } else {
                Grade::Weak(format!(
                    "Tighten Content-Security-Policy: {}",
                    issues.join(", ")
                ))
            }
        }
        "strict-transport-security" => {
            let max_age = lowered
                .split(';')
                .filter_map(|part| part.trim().strip_prefix("max-age="))
                .find_map(|age| age.trim_matches('"').parse::<u64>().ok())
                .unwrap_or(0);
            let subdomains = lowered
                .split(';')
                .any(|part| part.trim() == "includesubdomains");
            if max_age >= HSTS_MIN_MAX_AGE && subdomains {
                Grade::Strong
            } else {
                Grade::Weak(
                    "Use Strict-Transport-Security: max-age=31536000; includeSubDomains".to_string(),
                )
            }
        }
        "x-frame-options" => {
            if lowered == "deny" || lowered == "sameorigin" {
                Grade::Strong
            } else {
                Grade::Weak("Set X-Frame-Options to DENY".to_string())
            }
        }
        "x-content-type-options" => {
            if lowered == "nosniff" {
                Grade::Strong
            } else {
                Grade::Weak("Set X-Content-Type-Options to nosniff".to_string())
            }
        }
        "referrer-policy" => {
            // The last recognised token wins.
            let effective = lowered.split(',').map(str::trim).next_back().unwrap_or("");
            if STRICT_REFERRER_POLICIES.contains(&effective) {
                Grade::Strong
            } else {
                Grade::Weak(
                    "Use Referrer-Policy: strict-origin-when-cross-origin".to_string(),
                )
            }
        }
        "permissions-policy" => {
            if lowered.contains('*') {
                Grade::Weak("Restrict Permissions-Policy features to explicit origins".to_string())
            } else {
                Grade::Strong
            }
        }
        "x-xss-protection" => {
            let compact: String = lowered.chars().filter(|ch| !ch.is_whitespace()).collect();
            if compact == "0" || compact == "1;mode=block" {
                Grade::Strong
            } else {
                Grade::Weak("Set X-XSS-Protection to 0 and rely on CSP".to_string())
            }
        }
        _ => Grade::Strong,
    }
}

fn missing_recommendation(name: &str) -> String {
    match name {
        "content-security-policy" => {
            "Add a Content-Security-Policy without unsafe-inline or unsafe-eval".to_string()
        }
        "strict-transport-security" => {
            "Add Strict-Transport-Security: max-age=31536000; includeSubDomains".to_string()
        }
        "x-frame-options" => "Add X-Frame-Options: DENY".to_string(),
        "x-content-type-options" => "Add X-Content-Type-Options: nosniff".to_string(),
        "referrer-policy" => "Add Referrer-Policy: strict-origin-when-cross-origin".to_string(),
        "permissions-policy" => "Add a Permissions-Policy disabling unused features".to_string(),
        "x-xss-protection" => "Add X-XSS-Protection: 0".to_string(),
        other => format!("Add {other}"),
    }
}
