use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by the inventory endpoints. Bodies carry the message
/// under a `detail` key.
#[derive(Debug, Error)]
pub enum PantryError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl IntoResponse for PantryError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => {
                tracing::error!(error = %self, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}
