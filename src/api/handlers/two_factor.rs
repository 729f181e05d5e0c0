//! Two-factor enrollment and verification for the signed-in user.

use super::{
    ErrorBody, SuccessBody, authenticate, error_response, internal_error, parse_json,
    parse_json_or_default, success,
};
use crate::{
    session::SessionManager,
    two_factor::{SetupResult, TwoFactorError, TwoFactorService, TwoFactorStatus, VerifyOutcome},
};
use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupRequest {
    /// Label shown in the authenticator app; defaults to the user id.
    pub account_label: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// 6-digit TOTP code or an 8-character backup code.
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

fn two_factor_error(err: &TwoFactorError) -> Response {
    match err {
        TwoFactorError::AlreadyEnabled => error_response(
            StatusCode::CONFLICT,
            "already_enabled",
            "Two-factor authentication is already enabled",
        ),
        TwoFactorError::NotPending => error_response(
            StatusCode::BAD_REQUEST,
            "not_pending",
            "Start two-factor setup first",
        ),
        TwoFactorError::NotEnabled => error_response(
            StatusCode::BAD_REQUEST,
            "not_enabled",
            "Two-factor authentication is not enabled",
        ),
        TwoFactorError::InvalidToken => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_token",
            "Invalid verification code",
        ),
        TwoFactorError::Store(_) | TwoFactorError::Provisioning(_) => {
            error!("Two-factor operation failed: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/setup",
    request_body = SetupRequest,
    responses(
        (status = 200, description = "Pending enrollment created; backup codes are shown once", body = SetupResult),
        (status = 400, description = "Malformed body", body = ErrorBody),
        (status = 401, description = "Not signed in", body = ErrorBody),
        (status = 409, description = "Already enabled", body = ErrorBody)
    ),
    tag = "two-factor"
)]
pub async fn setup(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    two_factor: Extension<Arc<TwoFactorService>>,
    body: Bytes,
) -> Response {
    let session = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let request: SetupRequest = match parse_json_or_default(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let label = request
        .account_label
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| session.user_id.to_string());
    match two_factor.setup(session.user_id, &label).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => two_factor_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/enable",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = SuccessBody),
        (status = 400, description = "Invalid code or no pending setup", body = ErrorBody),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "two-factor"
)]
pub async fn enable(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    two_factor: Extension<Arc<TwoFactorService>>,
    body: Bytes,
) -> Response {
    let session = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let request: TokenRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match two_factor.enable(session.user_id, &request.token).await {
        Ok(()) => success("Two-factor authentication enabled"),
        Err(err) => two_factor_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/verify",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Code accepted", body = VerifyOutcome),
        (status = 400, description = "Code rejected or two-factor not enabled", body = ErrorBody),
        (status = 401, description = "Not signed in", body = ErrorBody),
        (status = 429, description = "Too many attempts")
    ),
    tag = "two-factor"
)]
pub async fn verify(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    two_factor: Extension<Arc<TwoFactorService>>,
    body: Bytes,
) -> Response {
    let session = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let request: TokenRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match two_factor.verify(session.user_id, &request.token).await {
        Ok(outcome) if outcome.success => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(_) => two_factor_error(&TwoFactorError::InvalidToken),
        Err(err) => two_factor_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/disable",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Two-factor disabled", body = SuccessBody),
        (status = 400, description = "Code rejected; enrollment unchanged", body = ErrorBody),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "two-factor"
)]
pub async fn disable(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    two_factor: Extension<Arc<TwoFactorService>>,
    body: Bytes,
) -> Response {
    let session = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let request: TokenRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match two_factor.disable(session.user_id, &request.token).await {
        Ok(()) => success("Two-factor authentication disabled"),
        Err(err) => two_factor_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/2fa/backup-codes",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "New backup codes; the previous set no longer works", body = BackupCodesResponse),
        (status = 400, description = "Code rejected", body = ErrorBody),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "two-factor"
)]
pub async fn regenerate_backup_codes(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    two_factor: Extension<Arc<TwoFactorService>>,
    body: Bytes,
) -> Response {
    let session = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let request: TokenRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match two_factor
        .regenerate_backup_codes(session.user_id, &request.token)
        .await
    {
        Ok(backup_codes) => {
            (StatusCode::OK, Json(BackupCodesResponse { backup_codes })).into_response()
        }
        Err(err) => two_factor_error(&err),
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/2fa/status",
    responses(
        (status = 200, description = "Enrollment status", body = TwoFactorStatus),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "two-factor"
)]
pub async fn status(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    two_factor: Extension<Arc<TwoFactorService>>,
) -> Response {
    let session = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    match two_factor.status(session.user_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => two_factor_error(&err),
    }
}
