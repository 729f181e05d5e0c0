//! Services shared by middleware and handlers.

use crate::{
    api::utils::extract_client_ip,
    csrf::CsrfService,
    headers::SecurityHeaders,
    rate_limit::{RateLimitPolicy, RateLimiter},
    session::SessionManager,
    two_factor::TwoFactorService,
};
use axum::http::{HeaderMap, Method};
use std::sync::Arc;

/// Derives the rate limit identity of a request.
pub type ClientKeyFn = Arc<dyn Fn(&HeaderMap) -> String + Send + Sync>;

const AUTH_ATTEMPT_PREFIX: &str = "/api/auth/2fa/";

/// Which policy a request is counted against.
#[derive(Clone, Debug)]
pub struct RateLimitRules {
    api: RateLimitPolicy,
    auth: RateLimitPolicy,
    auth_prefixes: Vec<String>,
}

impl Default for RateLimitRules {
    fn default() -> Self {
        Self {
            api: RateLimitPolicy::api(),
            auth: RateLimitPolicy::auth(),
            auth_prefixes: vec![AUTH_ATTEMPT_PREFIX.to_string()],
        }
    }
}

impl RateLimitRules {
    #[must_use]
    pub fn new(api: RateLimitPolicy, auth: RateLimitPolicy) -> Self {
        Self {
            api,
            auth,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_auth_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.auth_prefixes = prefixes;
        self
    }

    /// `POST`s under an auth prefix count as authentication attempts; other
    /// `/api` traffic uses the general policy; everything else is not limited.
    #[must_use]
    pub fn policy_for(&self, method: &Method, path: &str) -> Option<&RateLimitPolicy> {
        if *method == Method::POST
            && self
                .auth_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return Some(&self.auth);
        }
        if path.starts_with("/api/") {
            return Some(&self.api);
        }
        None
    }
}

#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limits: Arc<RateLimitRules>,
    pub client_key: ClientKeyFn,
    pub csrf: Arc<CsrfService>,
    pub sessions: Arc<SessionManager>,
    pub two_factor: Arc<TwoFactorService>,
    pub security_headers: Arc<SecurityHeaders>,
}

impl AppState {
    #[must_use]
    pub fn new(
        rate_limiter: RateLimiter,
        csrf: CsrfService,
        sessions: SessionManager,
        two_factor: TwoFactorService,
    ) -> Self {
        Self {
            rate_limiter: Arc::new(rate_limiter),
            rate_limits: Arc::new(RateLimitRules::default()),
            client_key: Arc::new(default_client_key),
            csrf: Arc::new(csrf),
            sessions: Arc::new(sessions),
            two_factor: Arc::new(two_factor),
            security_headers: Arc::new(SecurityHeaders::default()),
        }
    }

    #[must_use]
    pub fn with_rate_limits(mut self, rules: RateLimitRules) -> Self {
        self.rate_limits = Arc::new(rules);
        self
    }

    #[must_use]
    pub fn with_client_key(mut self, client_key: ClientKeyFn) -> Self {
        self.client_key = client_key;
        self
    }

    #[must_use]
    pub fn with_security_headers(mut self, headers: SecurityHeaders) -> Self {
        self.security_headers = Arc::new(headers);
        self
    }
}

/// Client IP from proxy headers, `unknown` when absent.
#[must_use]
pub fn default_client_key(headers: &HeaderMap) -> String {
    extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::AUTH_KEY_PREFIX;
    use axum::http::HeaderValue;

    #[test]
    fn auth_policy_only_for_posts_under_prefix() {
        let rules = RateLimitRules::default();
        let auth = rules.policy_for(&Method::POST, "/api/auth/2fa/verify");
        assert_eq!(auth.map(RateLimitPolicy::max_requests), Some(5));

        let status = rules.policy_for(&Method::GET, "/api/auth/2fa/status");
        assert_eq!(status.map(RateLimitPolicy::max_requests), Some(100));

        assert!(rules.policy_for(&Method::GET, "/health").is_none());
    }

    #[test]
    fn custom_auth_prefixes() {
        let rules = RateLimitRules::default().with_auth_prefixes(vec!["/api/login".to_string()]);
        let login = rules.policy_for(&Method::POST, "/api/login");
        assert_eq!(login.map(RateLimitPolicy::prefix), Some(AUTH_KEY_PREFIX));

        let verify = rules.policy_for(&Method::POST, "/api/auth/2fa/verify");
        assert_eq!(verify.map(RateLimitPolicy::max_requests), Some(100));
    }

    #[test]
    fn client_key_defaults_to_unknown() {
        assert_eq!(default_client_key(&HeaderMap::new()), "unknown");
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(default_client_key(&headers), "198.51.100.7");
    }
}
