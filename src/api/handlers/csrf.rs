use super::{ErrorBody, internal_error};
use crate::csrf::{CsrfService, csrf_cookie};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    /// Echo this value in the `x-csrf-token` header.
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[utoipa::path(
    get,
    path = "/api/csrf-token",
    responses(
        (status = 200, description = "Token issued; the signed triple is set as the csrf-token cookie", body = CsrfTokenResponse),
        (status = 500, description = "Token generation failed", body = ErrorBody)
    ),
    tag = "security"
)]
pub async fn csrf_token(csrf: Extension<Arc<CsrfService>>) -> Response {
    let token = match csrf.issue() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue CSRF token: {err:#}");
            return internal_error();
        }
    };
    let cookie = match csrf_cookie(&token, csrf.config().secure_cookie()) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build CSRF cookie: {err:#}");
            return internal_error();
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    let body = CsrfTokenResponse {
        expires_at: token.expires_at(),
        token: token.token,
    };
    (StatusCode::OK, headers, Json(body)).into_response()
}
