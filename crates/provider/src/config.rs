use std::time::Duration;

use crate::poll::PollConfig;

/// Default model slug used when `REPLICATE_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "google/nano-banana";

/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Image provider configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Bearer token. `None` leaves the provider unconfigured.
    pub api_token: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Limit for a single HTTP exchange (submit, status check, download).
    pub request_timeout: Duration,
    pub poll: PollConfig,
}

impl ProviderConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                      |
    /// |-------------------------|------------------------------|
    /// | `REPLICATE_API_TOKEN`   | unset (provider disabled)    |
    /// | `REPLICATE_MODEL`       | `google/nano-banana`         |
    /// | `REPLICATE_BASE_URL`    | `https://api.replicate.com`  |
    /// | `PROVIDER_TIMEOUT_SECS` | `600`                        |
    /// | `PROVIDER_REQUEST_TIMEOUT_SECS` | `60`                 |
    pub fn from_env() -> Self {
        let api_token = std::env::var("REPLICATE_API_TOKEN")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let model = std::env::var("REPLICATE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());

        let base_url =
            std::env::var("REPLICATE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout_secs: u64 = std::env::var("PROVIDER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("PROVIDER_TIMEOUT_SECS must be a valid u64");

        let request_timeout_secs: u64 = std::env::var("PROVIDER_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_REQUEST_TIMEOUT_SECS.to_string())
            .parse()
            .expect("PROVIDER_REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            api_token,
            model,
            base_url,
            request_timeout: Duration::from_secs(request_timeout_secs),
            poll: PollConfig {
                timeout: Duration::from_secs(timeout_secs),
                ..PollConfig::default()
            },
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            poll: PollConfig::default(),
        }
    }
}
