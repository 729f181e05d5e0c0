use crate::{api::state::AppState, rate_limit::RateLimitOutcome};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Debug, Serialize, ToSchema)]
pub struct RateLimitedBody {
    pub error: String,
    pub limit: u32,
    pub remaining: u32,
    /// RFC 3339 time the window resets.
    pub reset: String,
}

/// Count the request and attach `X-RateLimit-*` headers; `429` once the window is spent.
pub async fn enforce(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let Some(policy) = state
        .rate_limits
        .policy_for(request.method(), request.uri().path())
    else {
        return next.run(request).await;
    };

    let client = (state.client_key)(request.headers());
    let outcome = state.rate_limiter.check_policy(policy, &client).await;

    if !outcome.allowed {
        warn!(
            client = %client,
            path = request.uri().path(),
            limit = outcome.limit,
            "request rate limited"
        );
        return limited_response(&outcome);
    }

    let mut response = next.run(request).await;
    insert_headers(response.headers_mut(), &outcome);
    response
}

fn limited_response(outcome: &RateLimitOutcome) -> Response {
    let body = RateLimitedBody {
        error: "Too many requests, please try again later".to_string(),
        limit: outcome.limit,
        remaining: outcome.remaining,
        reset: reset_value(outcome),
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    insert_headers(headers, outcome);
    if let Some(seconds) = outcome.retry_after_seconds {
        headers.insert(RETRY_AFTER, HeaderValue::from(seconds));
    }
    response
}

fn insert_headers(headers: &mut HeaderMap, outcome: &RateLimitOutcome) {
    headers.insert(
        HeaderName::from_static(LIMIT_HEADER),
        HeaderValue::from(outcome.limit),
    );
    headers.insert(
        HeaderName::from_static(REMAINING_HEADER),
        HeaderValue::from(outcome.remaining),
    );
    if let Ok(reset) = HeaderValue::from_str(&reset_value(outcome)) {
        headers.insert(HeaderName::from_static(RESET_HEADER), reset);
    }
}

fn reset_value(outcome: &RateLimitOutcome) -> String {
    outcome.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
