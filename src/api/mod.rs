use crate::{
    api::handlers::health,
    csrf::{CsrfConfig, CsrfService},
    rate_limit::{RateLimiter, RedisCounterStore},
    session::{PgSessionStore, SessionConfig, SessionManager, spawn_expiry_sweeper},
    two_factor::{PgTwoFactorStore, TwoFactorConfig, TwoFactorService},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::from_fn_with_state,
    routing::options,
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
pub(crate) mod middleware;
mod openapi;
pub mod state;
pub(crate) mod utils;

pub use openapi::openapi;
pub use state::{AppState, RateLimitRules};

#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the server needs besides the listen port and the DSN.
#[derive(Debug)]
pub struct ServerConfig {
    pub redis_url: String,
    pub public_origin: String,
    pub csrf_secret: SecretString,
    pub csrf: CsrfConfig,
    pub rate_limits: RateLimitRules,
    pub sessions: SessionConfig,
    pub two_factor: TwoFactorConfig,
    pub store_timeout: Duration,
    pub session_sweep: Duration,
}

/// Routes plus the security middleware, without the transport layers.
///
/// Request flow: security headers, then rate limiting, then CSRF, then the
/// handler. Services are also exposed as extensions for the handlers.
pub fn app(state: AppState) -> Router {
    let (router, _openapi) = router().split_for_parts();
    router
        .route("/health", options(health::health))
        .layer(from_fn_with_state(
            state.csrf.clone(),
            middleware::csrf::enforce,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::enforce,
        ))
        .layer(from_fn_with_state(
            state.security_headers.clone(),
            middleware::headers::apply,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(state.csrf.clone()))
                .layer(Extension(state.sessions.clone()))
                .layer(Extension(state.two_factor.clone()))
                .layer(Extension(state.security_headers.clone())),
        )
}

/// Connect the stores, build the services and serve until ctrl-c.
///
/// # Errors
/// Returns an error if a store is unreachable, the configuration is invalid
/// or the listener cannot be bound.
pub async fn new(port: u16, dsn: String, config: ServerConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let counters = RedisCounterStore::connect(&config.redis_url).await?;

    let secure_cookie = Url::parse(&config.public_origin)
        .map(|url| url.scheme() == "https")
        .unwrap_or(true);
    let csrf = CsrfService::new(
        config.csrf_secret,
        config.csrf.with_secure_cookie(secure_cookie),
    )?;

    let rate_limiter =
        RateLimiter::new(Arc::new(counters)).with_timeout(config.store_timeout);
    let sessions = SessionManager::new(
        Arc::new(PgSessionStore::new(pool.clone())),
        config.sessions.with_store_timeout(config.store_timeout),
    );
    let two_factor = TwoFactorService::new(
        Arc::new(PgTwoFactorStore::new(pool.clone())),
        config.two_factor.with_store_timeout(config.store_timeout),
    );

    let state = AppState::new(rate_limiter, csrf, sessions, two_factor)
        .with_rate_limits(config.rate_limits);

    let sweeper = spawn_expiry_sweeper(state.sessions.clone(), config.session_sweep);

    let frontend_origin = frontend_origin(&config.public_origin)?;
    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(crate::csrf::CSRF_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = app(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper.abort();

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(public_origin: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(public_origin)
        .with_context(|| format!("Invalid public origin: {public_origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Public origin must include a valid host: {public_origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
