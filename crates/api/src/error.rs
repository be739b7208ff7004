use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reelforge_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Every response body is `{ "error": message, "code": CODE }`, plus
/// `activeId` for lock conflicts.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed request outside the domain layer (bad id, bad query).
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal(message: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %message, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut active_id = None;

        let (status, code, message) = match &self {
            AppError::Core(core) => {
                let status = match core {
                    CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CoreError::Validation(_) | CoreError::ReferenceRequired { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    CoreError::LockConflict { active_id: id, .. } => {
                        active_id = Some(id.clone());
                        StatusCode::CONFLICT
                    }
                    CoreError::Conflict(_) | CoreError::Canceled(_) => StatusCode::CONFLICT,
                    CoreError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
                    CoreError::Provider { .. } => StatusCode::BAD_GATEWAY,
                    CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    CoreError::IndexFailed(_) | CoreError::Io(_) | CoreError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(code = core.code(), error = %core, "Internal core error");
                    (status, core.code(), "An internal error occurred".to_string())
                } else {
                    (status, core.code(), core.to_info().message)
                }
            }

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(id) = active_id {
            body["activeId"] = json!(id);
        }

        (status, axum::Json(body)).into_response()
    }
}
