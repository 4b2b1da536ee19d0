//! HTTP boundary error taxonomy.
//!
//! Everything an endpoint can fail with maps onto four classes. Upstream
//! failures (provider API, vector store, LLM) are logged with full detail
//! here and leave the process as a generic 500 — raw error text never
//! reaches the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::AppError;

#[derive(Debug)]
pub enum ApiError {
    /// Missing/invalid session or missing provider credentials → 401.
    Auth(String),
    /// Missing required request data or a broken OAuth handshake → 400.
    BadRequest(String),
    /// Requested data absent → 404.
    NotFound(String),
    /// Provider/store/LLM failure → 500 with a generic body.
    Upstream(AppError),
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError::Upstream(e)
    }
}

/// Build a JSON error response body.
pub fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(msg) => {
                (StatusCode::UNAUTHORIZED, json_error("unauthorized", msg)).into_response()
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, json_error("bad_request", msg)).into_response()
            }
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, json_error("not_found", msg)).into_response()
            }
            ApiError::Upstream(e) => {
                error!(error = %e, "request failed on an upstream call");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json_error("internal", "internal server error"),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            ApiError::Auth("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Upstream(AppError::Gmail("boom".into()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
