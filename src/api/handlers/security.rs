//! Header audit and CSP violation intake.

use super::{ErrorBody, error_response};
use crate::headers::{
    CspReportEnvelope, SecurityAuditResult, SecurityHeaders, log_violation, process_report,
};
use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

const REPORT_CONTENT_TYPES: [&str; 2] = ["application/csp-report", "application/json"];

#[utoipa::path(
    get,
    path = "/api/security/audit",
    responses(
        (status = 200, description = "Score of the headers this service emits", body = SecurityAuditResult)
    ),
    tag = "security"
)]
pub async fn audit(security_headers: Extension<Arc<SecurityHeaders>>) -> impl IntoResponse {
    Json(security_headers.audit())
}

#[utoipa::path(
    post,
    path = "/api/security/csp-report",
    request_body(content = CspReportEnvelope, content_type = "application/csp-report"),
    responses(
        (status = 204, description = "Report accepted"),
        (status = 400, description = "Malformed report", body = ErrorBody),
        (status = 415, description = "Unsupported content type", body = ErrorBody)
    ),
    tag = "security"
)]
pub async fn csp_report(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !REPORT_CONTENT_TYPES.contains(&content_type.as_str()) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "Expected application/csp-report or application/json",
        );
    }

    let envelope: CspReportEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!("Malformed CSP report: {err}");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_report",
                "Malformed CSP report",
            );
        }
    };

    match process_report(&envelope.report) {
        Some(violation) => log_violation(&violation),
        None => debug!("Dropped CSP report from a browser extension"),
    }
    StatusCode::NO_CONTENT.into_response()
}
