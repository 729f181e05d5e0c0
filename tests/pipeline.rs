use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    response::Response,
};
use guardia::{
    api::{self, AppState, RateLimitRules},
    csrf::{CsrfConfig, CsrfService},
    headers::SecurityHeaders,
    rate_limit::{MemoryCounterStore, RateLimitPolicy, RateLimiter},
    session::{MemorySessionStore, SessionConfig, SessionManager},
    two_factor::{MemoryTwoFactorStore, TwoFactorConfig, TwoFactorService},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use totp_rs::{Algorithm, Secret, TOTP};
use tower::ServiceExt;
use uuid::Uuid;

fn state(auth_max_requests: u32) -> AppState {
    let rate_limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
    let csrf = CsrfService::new(
        SecretString::from("pipeline-test-secret"),
        CsrfConfig::new().with_secure_cookie(false),
    )
    .expect("csrf service");
    let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()), SessionConfig::new());
    let two_factor = TwoFactorService::new(
        Arc::new(MemoryTwoFactorStore::new()),
        TwoFactorConfig::new(),
    );
    AppState::new(rate_limiter, csrf, sessions, two_factor).with_rate_limits(RateLimitRules::new(
        RateLimitPolicy::api(),
        RateLimitPolicy::auth()
            .with_window(Duration::from_millis(900_000))
            .with_max_requests(auth_max_requests),
    ))
}

async fn sign_in(state: &AppState) -> String {
    let created = state
        .sessions
        .create_session(Uuid::new_v4(), Some("203.0.113.7"), Some("pipeline-test"), None)
        .await
        .expect("session");
    created.session_id.to_string()
}

/// Fetch a CSRF token; returns the header token and the `Cookie` header value.
async fn csrf_pair(app: &Router) -> (String, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/csrf-token")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .expect("csrf cookie")
        .to_string();
    let body = json_body(response).await;
    let token = body["token"].as_str().expect("token").to_string();
    (token, cookie)
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn post(uri: &str, session: &str, csrf_token: &str, cookie: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {session}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-csrf-token", csrf_token)
        .header(header::COOKIE, cookie)
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn current_code(secret: &str) -> String {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .expect("base32 secret");
    TOTP::new(
        Algorithm::SHA1,
        6,
        0,
        30,
        bytes,
        None,
        "pipeline".to_string(),
    )
    .expect("totp")
    .generate_current()
    .expect("code")
}

#[tokio::test]
async fn csrf_token_round_trip_allows_post() {
    let state = state(5);
    let session = sign_in(&state).await;
    let app = api::app(state);

    let (token, cookie) = csrf_pair(&app).await;
    let response = app
        .oneshot(post(
            "/api/auth/sessions/revoke-others",
            &session,
            &token,
            &cookie,
            &json!({}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["revoked"], json!(0));
}

#[tokio::test]
async fn wrong_csrf_header_is_forbidden() {
    let state = state(5);
    let session = sign_in(&state).await;
    let app = api::app(state);

    let (_token, cookie) = csrf_pair(&app).await;
    let response = app
        .oneshot(post(
            "/api/auth/sessions/revoke-others",
            &session,
            "wrong-token",
            &cookie,
            &json!({}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // Rejections still carry the security headers.
    assert_eq!(
        response
            .headers()
            .get("x-frame-options")
            .and_then(|v| v.to_str().ok()),
        Some("DENY")
    );
}

#[tokio::test]
async fn post_without_csrf_cookie_is_forbidden() {
    let state = state(5);
    let session = sign_in(&state).await;
    let app = api::app(state);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/sessions/revoke-others")
        .header(header::AUTHORIZATION, format!("Bearer {session}"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sixth_auth_attempt_is_rate_limited() {
    let state = state(5);
    let session = sign_in(&state).await;
    let app = api::app(state);
    let (token, cookie) = csrf_pair(&app).await;

    for attempt in 1..=5u32 {
        let response = app
            .clone()
            .oneshot(post(
                "/api/auth/2fa/verify",
                &session,
                &token,
                &cookie,
                &json!({"token": "123456"}),
            ))
            .await
            .expect("response");
        assert_ne!(
            response.status(),
            StatusCode::TOO_MANY_REQUESTS,
            "attempt {attempt}"
        );
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        assert_eq!(remaining, Some((5 - attempt).to_string()));
    }

    let response = app
        .oneshot(post(
            "/api/auth/2fa/verify",
            &session,
            &token,
            &cookie,
            &json!({"token": "123456"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = json_body(response).await;
    assert_eq!(body["limit"], json!(5));
    assert_eq!(body["remaining"], json!(0));
}

#[tokio::test]
async fn backup_code_is_single_use() {
    let state = state(10);
    let session = sign_in(&state).await;
    let app = api::app(state);
    let (token, cookie) = csrf_pair(&app).await;

    let response = app
        .clone()
        .oneshot(post(
            "/api/auth/2fa/setup",
            &session,
            &token,
            &cookie,
            &json!({"accountLabel": "alice@example.com"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let setup = json_body(response).await;
    let secret = setup["secret"].as_str().expect("secret").to_string();
    let backup_codes: Vec<String> = setup["backupCodes"]
        .as_array()
        .expect("backup codes")
        .iter()
        .filter_map(|code| code.as_str().map(str::to_string))
        .collect();
    assert_eq!(backup_codes.len(), 10);

    let response = app
        .clone()
        .oneshot(post(
            "/api/auth/2fa/enable",
            &session,
            &token,
            &cookie,
            &json!({"token": current_code(&secret)}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let first = json!({"token": backup_codes[0]});
    let response = app
        .clone()
        .oneshot(post("/api/auth/2fa/verify", &session, &token, &cookie, &first))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = json_body(response).await;
    assert_eq!(outcome["success"], json!(true));
    assert_eq!(outcome["backupCodeUsed"], json!(true));

    let response = app
        .clone()
        .oneshot(post("/api/auth/2fa/verify", &session, &token, &cookie, &first))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .uri("/api/auth/2fa/status")
        .header(header::AUTHORIZATION, format!("Bearer {session}"))
        .body(Body::empty())
        .expect("request");
    let status = json_body(app.oneshot(request).await.expect("response")).await;
    assert_eq!(status["isEnabled"], json!(true));
    assert_eq!(status["backupCodesRemaining"], json!(9));
}

#[tokio::test]
async fn unauthenticated_session_status() {
    let app = api::app(state(5));
    let request = Request::builder()
        .uri("/api/auth/session")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoke_without_session_id_is_bad_request() {
    let state = state(5);
    let session = sign_in(&state).await;
    let app = api::app(state);

    let (token, cookie) = csrf_pair(&app).await;
    let response = app
        .oneshot(post(
            "/api/auth/sessions/revoke",
            &session,
            &token,
            &cookie,
            &json!({}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], json!("invalid_request"));
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn bodyless_request_without_session_is_unauthorized() {
    let app = api::app(state(5));
    let (token, cookie) = csrf_pair(&app).await;

    for uri in ["/api/auth/sessions/revoke", "/api/auth/2fa/verify"] {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("x-csrf-token", &token)
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        let body = json_body(response).await;
        assert_eq!(body["error"], json!("unauthorized"));
    }
}

#[tokio::test]
async fn two_factor_setup_accepts_empty_body() {
    let state = state(5);
    let session = sign_in(&state).await;
    let app = api::app(state);

    let (token, cookie) = csrf_pair(&app).await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/2fa/setup")
        .header(header::AUTHORIZATION, format!("Bearer {session}"))
        .header("x-csrf-token", &token)
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/2fa/enable")
        .header(header::AUTHORIZATION, format!("Bearer {session}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-csrf-token", &token)
        .header(header::COOKIE, &cookie)
        .body(Body::from("{\"code\": 1}"))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], json!("invalid_request"));
}

#[tokio::test]
async fn csp_report_skips_csrf() {
    let app = api::app(state(5));
    let report = json!({
        "csp-report": {
            "document-uri": "https://app.guardia.dev/",
            "violated-directive": "script-src-elem",
            "blocked-uri": "https://evil.example/x.js"
        }
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/security/csp-report")
        .header(header::CONTENT_TYPE, "application/csp-report")
        .body(Body::from(report.to_string()))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn emitted_headers_score_well() {
    let app = api::app(state(5));
    let request = Request::builder()
        .uri("/api/security/audit")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let emitted: HeaderMap = response.headers().clone();
    assert!(emitted.contains_key("content-security-policy"));
    assert!(emitted.contains_key("strict-transport-security"));

    let audit = json_body(response).await;
    let score = audit["score"].as_u64().expect("score");
    assert!(score >= 90, "score {score}");
}

#[tokio::test]
async fn health_without_database() {
    let app = api::app(state(5));
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    let body = json_body(response).await;
    assert_eq!(body["name"], json!("guardia"));
    assert_eq!(body["database"], json!("disabled"));
}

#[tokio::test]
async fn clients_are_limited_independently() {
    let client_key: guardia::api::state::ClientKeyFn = Arc::new(|headers: &HeaderMap| {
        headers
            .get("x-client")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous")
            .to_string()
    });
    let app = api::app(
        state(5)
            .with_rate_limits(RateLimitRules::new(
                RateLimitPolicy::api().with_max_requests(2),
                RateLimitPolicy::auth(),
            ))
            .with_client_key(client_key),
    );

    let status_for = |client: &'static str| {
        let app = app.clone();
        async move {
            let request = Request::builder()
                .uri("/api/security/audit")
                .header("x-client", client)
                .body(Body::empty())
                .expect("request");
            app.oneshot(request).await.expect("response").status()
        }
    };

    assert_eq!(status_for("a").await, StatusCode::OK);
    assert_eq!(status_for("a").await, StatusCode::OK);
    assert_eq!(status_for("a").await, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(status_for("b").await, StatusCode::OK);
}

#[tokio::test]
async fn configured_security_headers_are_emitted() {
    let headers = SecurityHeaders::default().with_header(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    let app = api::app(state(5).with_security_headers(headers));
    let request = Request::builder()
        .uri("/api/security/audit")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(
        response
            .headers()
            .get("x-frame-options")
            .and_then(|v| v.to_str().ok()),
        Some("SAMEORIGIN")
    );
}
