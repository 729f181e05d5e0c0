//! Session status, listing and revocation for the signed-in user.

use super::{
    ErrorBody, SuccessBody, authenticate, error_response, internal_error, parse_json, success,
};
use crate::session::{RevokeOutcome, SessionManager, SessionSummary};
use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub valid: bool,
    pub user_id: String,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    /// When the session goes idle without further activity.
    pub idle_expires_at: DateTime<Utc>,
    pub idle_timeout_minutes: i64,
    pub warning_threshold_minutes: i64,
    pub expires_soon: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokeOthersResponse {
    pub success: bool,
    pub message: String,
    pub revoked: u64,
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is valid", body = SessionStatusResponse),
        (status = 401, description = "Missing, revoked or expired session", body = ErrorBody)
    ),
    tag = "sessions"
)]
pub async fn session_status(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
) -> Response {
    let session = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let idle = sessions.idle_status(&session, Utc::now());
    let config = sessions.config();
    let response = SessionStatusResponse {
        valid: true,
        user_id: session.user_id.to_string(),
        session_id: session.id.to_string(),
        expires_at: session.expires_at,
        idle_expires_at: idle.idle_expires_at,
        idle_timeout_minutes: config.idle_timeout_minutes(),
        warning_threshold_minutes: config.warning_threshold_minutes(),
        expires_soon: idle.expires_soon,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    get,
    path = "/api/auth/sessions",
    responses(
        (status = 200, description = "Active sessions, most recent activity first", body = SessionListResponse),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "sessions"
)]
pub async fn list_sessions(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
) -> Response {
    let current = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    match sessions.list_sessions(current.user_id).await {
        Ok(list) => {
            let sessions = list
                .iter()
                .map(|session| SessionSummary::from_session(session, current.id))
                .collect();
            (StatusCode::OK, Json(SessionListResponse { sessions })).into_response()
        }
        Err(err) => {
            error!("Failed to list sessions: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/sessions/revoke",
    request_body = RevokeSessionRequest,
    responses(
        (status = 200, description = "Session revoked", body = SuccessBody),
        (status = 400, description = "Malformed body, unknown or foreign session id", body = ErrorBody),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "sessions"
)]
pub async fn revoke_session(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    body: Bytes,
) -> Response {
    let current = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let request: RevokeSessionRequest = match parse_json(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Ok(target) = Uuid::parse_str(request.session_id.trim()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_session_id",
            "Session ID is required",
        );
    };
    match sessions.revoke_session(target, current.user_id).await {
        Ok(RevokeOutcome::Revoked) => success("Session revoked successfully"),
        // Foreign sessions look the same as unknown ones.
        Ok(RevokeOutcome::NotFound) => error_response(
            StatusCode::BAD_REQUEST,
            "session_not_found",
            "Session not found",
        ),
        Err(err) => {
            error!("Failed to revoke session: {err}");
            internal_error()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/sessions/revoke-others",
    responses(
        (status = 200, description = "Every other session revoked", body = RevokeOthersResponse),
        (status = 401, description = "Not signed in", body = ErrorBody)
    ),
    tag = "sessions"
)]
pub async fn revoke_other_sessions(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
) -> Response {
    let current = match authenticate(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    match sessions
        .revoke_all_other_sessions(current.id, current.user_id)
        .await
    {
        Ok(revoked) => (
            StatusCode::OK,
            Json(RevokeOthersResponse {
                success: true,
                message: format!("Revoked {revoked} other session(s)"),
                revoked,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to revoke other sessions: {err}");
            internal_error()
        }
    }
}
