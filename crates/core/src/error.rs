use serde::{Deserialize, Serialize};

/// Domain error shared by every Reelforge crate.
///
/// Each variant maps to a stable machine-checkable code via
/// [`CoreError::code`], which is what terminal job/run records and HTTP
/// error bodies carry next to the human-readable message.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource {lock_key} is locked by {active_id}")]
    LockConflict { lock_key: String, active_id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Reindex failed: {0}")]
    IndexFailed(String),

    #[error("Shot {shot_id} requires at least one reference image but none were found")]
    ReferenceRequired { shot_id: String },

    #[error("Provider error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider { status: Option<u16>, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias used across the workspace.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Stable machine-checkable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::LockConflict { .. } => "LOCK_CONFLICT",
            Self::Conflict(_) => "CONFLICT",
            Self::Canceled(_) => "CANCELED",
            Self::AuthRequired(_) => "AUTH_REQUIRED",
            Self::IndexFailed(_) => "INDEX_FAILED",
            Self::ReferenceRequired { .. } => "REFERENCE_REQUIRED",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error represents an honored cooperative cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Snapshot of the error suitable for storing on a terminal record.
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable `{code, message}` pair attached to failed or canceled
/// jobs and runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}
