pub mod jobs;
pub mod projects;
pub mod runs;

use reelforge_core::error::CoreError;
use serde::de::DeserializeOwned;

/// Decode a JSON request body, reporting failures as `VALIDATION_FAILED`
/// rather than axum's plain-text rejection.
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T, CoreError> {
    if body.is_empty() {
        return Err(CoreError::Validation(format!("Missing {what}")));
    }
    serde_json::from_slice(body).map_err(|e| CoreError::Validation(format!("Invalid {what}: {e}")))
}
