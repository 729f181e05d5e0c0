use crate::{
    api::{handlers::error_response, utils::extract_client_ip},
    csrf::{CsrfDecision, CsrfService},
};
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

/// Reject state-changing requests without a valid double-submit token.
pub async fn enforce(
    State(csrf): State<Arc<CsrfService>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let decision = csrf.validate_request(request.method(), request.uri().path(), request.headers());
    match decision {
        CsrfDecision::Exempt | CsrfDecision::Valid => next.run(request).await,
        CsrfDecision::Rejected(reason) => {
            warn!(
                path = request.uri().path(),
                method = %request.method(),
                client = extract_client_ip(request.headers()).as_deref().unwrap_or("unknown"),
                reason = reason.as_str(),
                "CSRF check failed"
            );
            error_response(StatusCode::FORBIDDEN, reason.as_str(), reason.message())
        }
    }
}
