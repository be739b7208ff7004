use std::path::PathBuf;

use reelforge_events::DEFAULT_HISTORY_CAPACITY;
use reelforge_pipeline::proposer::ProposerConfig;
use reelforge_provider::ProviderConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Websocket streams
    /// are exempt once upgraded.
    pub request_timeout_secs: u64,
    /// Directory holding one sub-directory per project.
    pub projects_root: PathBuf,
    /// Job/run snapshots, event journals and run manifests.
    pub data_dir: PathBuf,
    /// Events kept in memory per job or run for replay.
    pub event_history_capacity: usize,
    pub provider: ProviderConfig,
    pub proposer: ProposerConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `HOST`                   | `0.0.0.0`               |
    /// | `PORT`                   | `3000`                  |
    /// | `CORS_ORIGINS`           | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                    |
    /// | `PROJECTS_ROOT`          | `./projects`            |
    /// | `DATA_DIR`               | `./data`                |
    /// | `EVENT_HISTORY_CAPACITY` | `500`                   |
    ///
    /// Provider and proposer settings are read by [`ProviderConfig::from_env`]
    /// and [`ProposerConfig::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let projects_root =
            PathBuf::from(std::env::var("PROJECTS_ROOT").unwrap_or_else(|_| "./projects".into()));
        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

        let event_history_capacity: usize = std::env::var("EVENT_HISTORY_CAPACITY")
            .map(|v| v.parse().expect("EVENT_HISTORY_CAPACITY must be a valid usize"))
            .unwrap_or(DEFAULT_HISTORY_CAPACITY);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            projects_root,
            data_dir,
            event_history_capacity,
            provider: ProviderConfig::from_env(),
            proposer: ProposerConfig::from_env(),
        }
    }
}
