//! REST API client for Replicate-compatible prediction endpoints.
//!
//! Wraps prediction creation, status retrieval and cancellation using
//! [`reqwest`] with bearer-token authentication.

use crate::messages::{CreatePredictionRequest, Prediction};

/// HTTP client for a prediction service.
#[derive(Clone)]
pub struct PredictionApi {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ProviderApiError {
    /// HTTP status, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

impl PredictionApi {
    /// * `base_url` - e.g. `https://api.replicate.com`, without trailing slash.
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_token)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// `POST /v1/models/{model}/predictions`.
    pub async fn create_prediction(
        &self,
        model: &str,
        body: &CreatePredictionRequest,
    ) -> Result<Prediction, ProviderApiError> {
        let response = self
            .client
            .post(format!("{}/v1/models/{}/predictions", self.base_url, model))
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /v1/predictions/{id}`.
    pub async fn get_prediction(&self, prediction_id: &str) -> Result<Prediction, ProviderApiError> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.base_url, prediction_id))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `POST /v1/predictions/{id}/cancel`.
    pub async fn cancel_prediction(&self, prediction_id: &str) -> Result<(), ProviderApiError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/predictions/{}/cancel",
                self.base_url, prediction_id
            ))
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an
    /// [`ProviderApiError::ApiError`] carrying status and body otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ProviderApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
