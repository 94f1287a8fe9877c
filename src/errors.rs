//! Typed error hierarchy for the SGE API.
//!
//! One enum covers every failure the HTTP surface can report. Handlers and
//! composite database operations return `SgeError` directly; the
//! `IntoResponse` impl renders the `{ok, message, data}` envelope with the
//! matching status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by the API. Conflicts are always HTTP 409, uniqueness
/// collisions on create/update included.
#[derive(Debug, Error)]
pub enum SgeError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl SgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
        }
        let body = serde_json::json!({
            "ok": false,
            "message": self.to_string(),
            "data": null,
        });
        (status, Json(body)).into_response()
    }
}
