use std::sync::Arc;

use reelforge_events::EventBus;
use reelforge_pipeline::continuity::ContinuityResolver;
use reelforge_pipeline::{
    AgentRunCoordinator, ContentProposer, GenerationExecutor, JobManager, LockManager,
    ProjectStore, Reindexer, TransactionalFileGuard,
};
use reelforge_provider::ImageProvider;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub locks: Arc<LockManager>,
    pub jobs: Arc<JobManager>,
    pub runs: Arc<AgentRunCoordinator>,
    pub continuity: Arc<ContinuityResolver>,
    /// Process-wide event bus; every job and run event is published here.
    pub event_bus: Arc<EventBus>,
    pub provider_configured: bool,
}

/// The collaborators [`AppState::assemble`] wires together.
pub struct Services {
    pub store: Arc<dyn ProjectStore>,
    pub reindexer: Arc<dyn Reindexer>,
    pub provider: Arc<dyn ImageProvider>,
    pub proposer: Arc<dyn ContentProposer>,
}

impl AppState {
    /// Construct the managers over `services`, sharing one lock table and
    /// one event bus between jobs and runs.
    pub fn assemble(config: ServerConfig, services: Services, event_bus: Arc<EventBus>) -> Self {
        let locks = Arc::new(LockManager::new());
        let provider_configured = services.provider.is_configured();

        let executor = Arc::new(GenerationExecutor::new(
            Arc::clone(&services.store),
            services.provider,
        ));
        let jobs = JobManager::new(Arc::clone(&locks), executor)
            .with_bus(Arc::clone(&event_bus))
            .with_data_dir(config.data_dir.clone())
            .with_history_capacity(config.event_history_capacity);

        let guard = TransactionalFileGuard::new(config.data_dir.clone());
        let runs = AgentRunCoordinator::new(
            Arc::clone(&locks),
            Arc::clone(&services.store),
            services.reindexer,
            services.proposer,
            Arc::new(guard),
        )
        .with_bus(Arc::clone(&event_bus))
        .with_history_capacity(config.event_history_capacity);

        Self {
            continuity: Arc::new(ContinuityResolver::new(services.store)),
            config: Arc::new(config),
            locks,
            jobs: Arc::new(jobs),
            runs: Arc::new(runs),
            event_bus,
            provider_configured,
        }
    }
}
