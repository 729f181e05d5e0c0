pub mod csrf;
pub mod health;
pub mod security;
pub mod sessions;
pub mod two_factor;

use crate::{
    api::utils::{cookie_value, extract_bearer_token},
    session::{Session, SessionManager, SessionValidation},
};
use axum::{
    Json,
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error};
use utoipa::ToSchema;

pub const SESSION_COOKIE_NAME: &str = "guardia_session";

/// Error body shared by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessBody {
    pub success: bool,
    pub message: String,
}

pub(crate) fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error",
    )
}

pub(crate) fn unauthorized() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Authentication required",
    )
}

pub(crate) fn success(message: &str) -> Response {
    (
        StatusCode::OK,
        Json(SuccessBody {
            success: true,
            message: message.to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn invalid_request() -> Response {
    error_response(
        StatusCode::BAD_REQUEST,
        "invalid_request",
        "Invalid request body",
    )
}

/// Decode a JSON body read after authentication, so callers without a session
/// see `401` before any body error.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|err| {
        debug!("rejected request body: {err}");
        invalid_request()
    })
}

/// Like [`parse_json`], but a blank body yields `T::default()`.
pub(crate) fn parse_json_or_default<T: DeserializeOwned + Default>(
    body: &Bytes,
) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}

/// Session token from `Authorization: Bearer` or the session cookie.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer_token(headers).or_else(|| cookie_value(headers, SESSION_COOKIE_NAME))
}

/// Resolve the caller's session.
///
/// Missing or invalid sessions become `401`; store failures become `500`.
pub(crate) async fn authenticate(
    headers: &HeaderMap,
    sessions: &SessionManager,
) -> Result<Session, Response> {
    let Some(token) = extract_session_token(headers) else {
        return Err(unauthorized());
    };
    match sessions.validate_token(&token).await {
        Ok(SessionValidation::Valid { session, .. }) => Ok(session),
        Ok(SessionValidation::Invalid(reason)) => {
            debug!(reason = reason.as_str(), "session rejected");
            Err(unauthorized())
        }
        Err(err) => {
            error!("Failed to validate session: {err}");
            Err(internal_error())
        }
    }
}
