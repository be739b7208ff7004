//! The [`ImageProvider`] seam and its Replicate-backed implementation.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::PredictionApi;
use crate::config::ProviderConfig;
use crate::download::download_to_path;
use crate::error::ProviderError;
use crate::messages::{CreatePredictionRequest, PredictionInput};
use crate::poll::{best_effort_cancel, poll_prediction, PollConfig};

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct PredictionOptions {
    pub aspect_ratio: Option<String>,
    /// Number of images requested.
    pub output_count: u32,
    /// Reference images as `data:` URIs, in priority order.
    pub reference_images: Vec<String>,
}

/// Successful prediction outcome.
#[derive(Debug, Clone)]
pub struct PredictionOutput {
    pub output: Vec<String>,
    pub prediction_id: String,
    pub duration: Duration,
}

/// An external image-synthesis backend.
///
/// Implementations must honor `cancel` while a prediction is in flight and
/// ask the backend to stop it before returning [`ProviderError::Canceled`].
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Whether credentials are present. Unconfigured providers reject every
    /// call with [`ProviderError::NotConfigured`].
    fn is_configured(&self) -> bool;

    async fn create_prediction(
        &self,
        prompt: &str,
        options: &PredictionOptions,
        cancel: &CancellationToken,
    ) -> Result<PredictionOutput, ProviderError>;

    async fn cancel_prediction(&self, prediction_id: &str) -> Result<(), ProviderError>;

    /// Download `uri` to `dest`, creating parent directories. Returns bytes
    /// written.
    async fn download_image(&self, uri: &str, dest: &Path) -> Result<u64, ProviderError>;
}

// ---------------------------------------------------------------------------
// ReplicateProvider
// ---------------------------------------------------------------------------

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReplicateProvider {
    api: Option<PredictionApi>,
    client: reqwest::Client,
    model: String,
    poll: PollConfig,
}

impl ReplicateProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to build reqwest HTTP client");
        let api = config
            .api_token
            .as_ref()
            .map(|token| PredictionApi::with_client(client.clone(), &config.base_url, token));
        Self {
            api,
            client,
            model: config.model.clone(),
            poll: config.poll.clone(),
        }
    }

    fn api(&self) -> Result<&PredictionApi, ProviderError> {
        self.api.as_ref().ok_or(ProviderError::NotConfigured)
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    fn is_configured(&self) -> bool {
        self.api.is_some()
    }

    async fn create_prediction(
        &self,
        prompt: &str,
        options: &PredictionOptions,
        cancel: &CancellationToken,
    ) -> Result<PredictionOutput, ProviderError> {
        let api = self.api()?;
        if cancel.is_cancelled() {
            return Err(ProviderError::Canceled);
        }

        let started = Instant::now();
        let body = CreatePredictionRequest {
            input: PredictionInput {
                prompt: prompt.to_string(),
                aspect_ratio: options.aspect_ratio.clone(),
                num_outputs: options.output_count.max(1),
                image_input: options.reference_images.clone(),
                output_format: "png",
            },
        };

        // The submit counts against the same budget as polling.
        let submit = tokio::time::timeout(self.poll.timeout, api.create_prediction(&self.model, &body));
        let created = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Canceled),
            result = submit => match result {
                Ok(created) => created?,
                Err(_) => {
                    tracing::warn!(
                        model = %self.model,
                        timeout_secs = self.poll.timeout.as_secs(),
                        "Prediction submission timed out",
                    );
                    return Err(ProviderError::SubmitTimeout {
                        after_secs: self.poll.timeout.as_secs(),
                    });
                }
            },
        };
        tracing::info!(
            prediction_id = %created.id,
            model = %self.model,
            references = options.reference_images.len(),
            outputs = options.output_count,
            "Prediction created",
        );

        let done = match poll_prediction(api, created, &self.poll, started, cancel).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(error = %e, "Prediction did not succeed");
                return Err(e);
            }
        };

        let output = done.output_uris();
        if output.is_empty() {
            return Err(ProviderError::NoOutput(done.id));
        }

        let duration = started.elapsed();
        tracing::info!(
            prediction_id = %done.id,
            outputs = output.len(),
            duration_ms = duration.as_millis() as u64,
            "Prediction succeeded",
        );

        Ok(PredictionOutput {
            output,
            prediction_id: done.id,
            duration,
        })
    }

    async fn cancel_prediction(&self, prediction_id: &str) -> Result<(), ProviderError> {
        let api = self.api()?;
        best_effort_cancel(api, prediction_id).await;
        Ok(())
    }

    async fn download_image(&self, uri: &str, dest: &Path) -> Result<u64, ProviderError> {
        download_to_path(&self.client, uri, dest).await
    }
}
