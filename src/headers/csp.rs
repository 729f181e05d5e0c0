//! Content-Security-Policy construction and linting.

use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

/// Where browsers post violation reports.
pub const CSP_REPORT_PATH: &str = "/api/security/csp-report";

/// Directives whose absence leaves a policy open to injection or framing.
const CRITICAL_DIRECTIVES: [&str; 4] = ["default-src", "object-src", "base-uri", "frame-ancestors"];

const UNSAFE_KEYWORDS: [&str; 3] = ["'unsafe-inline'", "'unsafe-eval'", "'unsafe-hashes'"];

/// Ordered list of directives rendered as `name src src; name src`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CspBuilder {
    directives: Vec<(String, Vec<String>)>,
}

impl Default for CspBuilder {
    /// Strict same-origin policy with no unsafe keywords.
    fn default() -> Self {
        Self::empty()
            .directive("default-src", ["'self'"])
            .directive("script-src", ["'self'"])
            .directive("style-src", ["'self'"])
            .directive("img-src", ["'self'", "data:"])
            .directive("font-src", ["'self'"])
            .directive("connect-src", ["'self'"])
            .directive("object-src", ["'none'"])
            .directive("base-uri", ["'self'"])
            .directive("form-action", ["'self'"])
            .directive("frame-ancestors", ["'none'"])
            .directive("upgrade-insecure-requests", Vec::<String>::new())
            .report_uri(CSP_REPORT_PATH)
    }
}

impl CspBuilder {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            directives: Vec::new(),
        }
    }

    /// Set a directive, replacing any previous sources for it.
    #[must_use]
    pub fn directive<I, S>(mut self, name: &str, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.trim().to_ascii_lowercase();
        let sources: Vec<String> = sources.into_iter().map(Into::into).collect();
        if let Some(entry) = self.directives.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = sources;
        } else {
            self.directives.push((name, sources));
        }
        self
    }

    /// Append one source to a directive, creating the directive if needed.
    #[must_use]
    pub fn add_source(mut self, name: &str, source: impl Into<String>) -> Self {
        let name = name.trim().to_ascii_lowercase();
        let source = source.into();
        match self.directives.iter_mut().find(|(n, _)| *n == name) {
            Some((_, sources)) => {
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
            None => self.directives.push((name, vec![source])),
        }
        self
    }

    #[must_use]
    pub fn report_uri(self, uri: &str) -> Self {
        self.directive("report-uri", [uri])
    }

    #[must_use]
    pub fn build(&self) -> String {
        self.directives
            .iter()
            .map(|(name, sources)| {
                if sources.is_empty() {
                    name.clone()
                } else {
                    format!("{name} {}", sources.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CspProblem {
    UnsafeKeyword,
    Wildcard,
    MissingDirective,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct CspIssue {
    pub directive: String,
    pub problem: CspProblem,
    pub detail: String,
}

impl fmt::Display for CspIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.problem {
            CspProblem::UnsafeKeyword => {
                write!(f, "{} allows {}", self.directive, self.detail)
            }
            CspProblem::Wildcard => {
                write!(f, "{} allows any origin ({})", self.directive, self.detail)
            }
            CspProblem::MissingDirective => write!(f, "{} is not set", self.directive),
        }
    }
}

/// Split a policy into `(directive, sources)` pairs. Later duplicates are ignored by browsers.
pub(crate) fn parse_policy(policy: &str) -> Vec<(String, Vec<&str>)> {
    let mut parsed: Vec<(String, Vec<&str>)> = Vec::new();
    for part in policy.split(';') {
        let mut tokens = part.split_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        if parsed.iter().any(|(existing, _)| *existing == name) {
            continue;
        }
        parsed.push((name, tokens.collect()));
    }
    parsed
}

/// Lint a policy: unsafe keywords, bare wildcards and missing critical directives.
#[must_use]
pub fn validate_csp(policy: &str) -> Vec<CspIssue> {
    let parsed = parse_policy(policy);
    let mut issues = Vec::new();

    for (directive, sources) in &parsed {
        for source in sources {
            let lowered = source.to_ascii_lowercase();
            if UNSAFE_KEYWORDS.contains(&lowered.as_str()) {
                issues.push(CspIssue {
                    directive: directive.clone(),
                    problem: CspProblem::UnsafeKeyword,
                    detail: lowered,
                });
            } else if lowered == "*" || lowered == "http:" || lowered == "https:" {
                issues.push(CspIssue {
                    directive: directive.clone(),
                    problem: CspProblem::Wildcard,
                    detail: lowered,
                });
            }
        }
    }

    for critical in CRITICAL_DIRECTIVES {
        if !parsed.iter().any(|(directive, _)| directive == critical) {
            issues.push(CspIssue {
                directive: critical.to_string(),
                problem: CspProblem::MissingDirective,
                detail: String::new(),
            });
        }
    }

    issues
}
