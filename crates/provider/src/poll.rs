//! Exponential-backoff polling of an in-flight prediction.
//!
//! [`poll_prediction`] re-fetches a prediction with increasing delays
//! until it reaches a terminal status, the wall-clock budget runs out, or
//! the [`CancellationToken`] fires. Both early exits ask the provider to
//! cancel the prediction before returning.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::api::PredictionApi;
use crate::error::ProviderError;
use crate::messages::{Prediction, PredictionStatus};

/// Tunable parameters for the polling strategy.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the first status check.
    pub initial_delay: Duration,
    /// Upper bound on the delay between checks.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each check.
    pub multiplier: f64,
    /// Hard wall-clock limit for the whole prediction.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 1.5,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`PollConfig::max_delay`].
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Poll until `initial` reaches a terminal status.
///
/// The budget runs from `started`, and a status check that hangs past it
/// counts as a timeout.
///
/// Returns the succeeded prediction. Failed or provider-canceled
/// predictions become [`ProviderError::Failed`]; a local cancel becomes
/// [`ProviderError::Canceled`] and an exhausted budget
/// [`ProviderError::Timeout`].
pub async fn poll_prediction(
    api: &PredictionApi,
    initial: Prediction,
    config: &PollConfig,
    started: Instant,
    cancel: &CancellationToken,
) -> Result<Prediction, ProviderError> {
    let prediction_id = initial.id.clone();
    let mut prediction = initial;
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        match prediction.status {
            PredictionStatus::Succeeded => return Ok(prediction),
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                return Err(ProviderError::Failed {
                    message: prediction.error_message(),
                    prediction_id,
                });
            }
            PredictionStatus::Starting | PredictionStatus::Processing => {}
        }

        let remaining = config.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(timeout_with_cancel(api, &prediction_id, config).await);
        }

        // Wait before the next check, respecting cancellation and the budget.
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(prediction_id = %prediction_id, "Prediction canceled locally");
                best_effort_cancel(api, &prediction_id).await;
                return Err(ProviderError::Canceled);
            }
            _ = tokio::time::sleep(delay.min(remaining)) => {}
        }

        attempt += 1;
        tracing::debug!(
            prediction_id = %prediction_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Polling prediction",
        );

        let remaining = config.timeout.saturating_sub(started.elapsed());
        tokio::select! {
            _ = cancel.cancelled() => {
                best_effort_cancel(api, &prediction_id).await;
                return Err(ProviderError::Canceled);
            }
            result = tokio::time::timeout(remaining, api.get_prediction(&prediction_id)) => {
                match result {
                    Ok(fetched) => prediction = fetched?,
                    Err(_) => return Err(timeout_with_cancel(api, &prediction_id, config).await),
                }
            }
        }

        delay = next_delay(delay, config);
    }
}

async fn timeout_with_cancel(
    api: &PredictionApi,
    prediction_id: &str,
    config: &PollConfig,
) -> ProviderError {
    tracing::warn!(
        prediction_id = %prediction_id,
        timeout_secs = config.timeout.as_secs(),
        "Prediction timed out",
    );
    best_effort_cancel(api, prediction_id).await;
    ProviderError::Timeout {
        prediction_id: prediction_id.to_string(),
        after_secs: config.timeout.as_secs(),
    }
}

/// Ask the provider to stop a prediction; failures are only logged.
pub async fn best_effort_cancel(api: &PredictionApi, prediction_id: &str) {
    if let Err(e) = api.cancel_prediction(prediction_id).await {
        tracing::warn!(
            prediction_id = %prediction_id,
            error = %e,
            "Remote cancel failed",
        );
    }
}
