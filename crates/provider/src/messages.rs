//! Prediction payloads exchanged with the provider REST API.
//!
//! The provider reports a prediction as `{"id", "status", "output", "error"}`.
//! `output` is a single URI on some models and an array on others; both
//! shapes deserialize into [`PredictionOutputValue`].

use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// `output` field: one URI or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionOutputValue {
    Single(String),
    Many(Vec<String>),
}

impl PredictionOutputValue {
    pub fn into_uris(self) -> Vec<String> {
        match self {
            Self::Single(uri) => vec![uri],
            Self::Many(uris) => uris,
        }
    }
}

/// Timing reported once a prediction finishes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionMetrics {
    /// Seconds spent running the model.
    #[serde(default)]
    pub predict_time: Option<f64>,
}

/// A prediction as returned by create and get calls.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<PredictionOutputValue>,
    /// Free-form failure detail; providers send either a string or an object.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub metrics: Option<PredictionMetrics>,
}

impl Prediction {
    /// Output URIs, empty when the prediction produced nothing.
    pub fn output_uris(&self) -> Vec<String> {
        self.output
            .clone()
            .map(PredictionOutputValue::into_uris)
            .unwrap_or_default()
    }

    /// Human-readable failure message.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("prediction {} {:?}", self.id, self.status),
        }
    }
}

/// Body of `POST /v1/models/{model}/predictions`.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePredictionRequest {
    pub input: PredictionInput,
}

/// Model input. Reference images travel as data URIs.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionInput {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    pub num_outputs: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub image_input: Vec<String>,
    pub output_format: &'static str,
}
