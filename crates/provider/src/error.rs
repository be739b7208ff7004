use reelforge_core::error::CoreError;

use crate::api::ProviderApiError;

/// Failures surfaced by an [`ImageProvider`](crate::ImageProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider is not configured (missing API token)")]
    NotConfigured,

    #[error(transparent)]
    Api(#[from] ProviderApiError),

    #[error("Prediction {prediction_id} timed out after {after_secs}s")]
    Timeout {
        prediction_id: String,
        after_secs: u64,
    },

    #[error("Prediction submission timed out after {after_secs}s")]
    SubmitTimeout { after_secs: u64 },

    #[error("Prediction canceled")]
    Canceled,

    #[error("Prediction {prediction_id} failed: {message}")]
    Failed {
        prediction_id: String,
        message: String,
    },

    #[error("Prediction {0} returned no output")]
    NoOutput(String),

    #[error("Invalid output URI: {0}")]
    InvalidUri(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured => CoreError::AuthRequired(err.to_string()),
            ProviderError::Api(ref api) => CoreError::Provider {
                status: api.status(),
                message: api.to_string(),
            },
            ProviderError::Timeout { .. } | ProviderError::SubmitTimeout { .. } => {
                CoreError::Timeout(err.to_string())
            }
            ProviderError::Canceled => CoreError::Canceled("provider call canceled".into()),
            ProviderError::Failed { .. }
            | ProviderError::NoOutput(_)
            | ProviderError::InvalidUri(_) => CoreError::Provider {
                status: None,
                message: err.to_string(),
            },
            ProviderError::Io(e) => CoreError::Io(e),
        }
    }
}
