//! Outbound image-synthesis provider.
//!
//! Provides the [`ImageProvider`] seam the pipeline generates through, a
//! Replicate-compatible REST client, exponential-backoff polling bounded
//! by a wall-clock timeout, and output download with atomic rename.

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod messages;
pub mod poll;
pub mod provider;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use provider::{ImageProvider, PredictionOptions, PredictionOutput, ReplicateProvider};
