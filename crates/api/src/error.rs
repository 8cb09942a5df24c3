use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use posegrid_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and implements [`IntoResponse`]
/// to produce the `{ "error": <one-line>, "code": <enum> }` envelope.
/// Internal details are logged, never echoed to the client.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `posegrid_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} '{id}' not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                // Transport failures surface verbatim; the caller decides
                // whether to retry.
                CoreError::Transport(msg) => {
                    (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", msg.clone())
                }
                CoreError::Execution { .. } | CoreError::Internal(_) => {
                    tracing::error!(error = %core, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
