#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reelforge_core::error::{CoreError, CoreResult};
use reelforge_core::generation::{GenerateShotInput, JobInput};
use reelforge_core::types::{JobId, RunId, Variation};
use reelforge_events::EventBus;
use reelforge_pipeline::guard::TransactionalFileGuard;
use reelforge_pipeline::proposer::{ContentProposer, ProposalRequest};
use reelforge_pipeline::{
    AgentRunCoordinator, FsProjectStore, GenerationExecutor, Job, JobManager, LockManager,
    ProjectStore, Reindexer, Run,
};
use reelforge_provider::download::download_to_path;
use reelforge_provider::{ImageProvider, PredictionOptions, PredictionOutput, ProviderError};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

pub const PROJECT: &str = "demo";

/// `data:` URIs decoding to "first" and "last".
pub const FIRST_URI: &str = "data:image/png;base64,Zmlyc3Q=";
pub const LAST_URI: &str = "data:image/png;base64,bGFzdA==";

// ---------------------------------------------------------------------------
// Fake provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub output_count: u32,
    pub reference_count: usize,
}

/// In-process image provider. Optionally holds every call until
/// [`FakeProvider::open`] so tests can observe in-flight jobs.
pub struct FakeProvider {
    configured: bool,
    gate: Option<Semaphore>,
    fail_next: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
    cancellations: AtomicUsize,
    pub started: Notify,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            configured: true,
            gate: None,
            fail_next: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            cancellations: AtomicUsize::new(0),
            started: Notify::new(),
        }
    }

    pub fn held() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Fail the next `n` calls with a provider error.
    pub fn failing(self, n: usize) -> Self {
        self.fail_next.store(n, Ordering::SeqCst);
        self
    }

    /// Let every held and future call proceed.
    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for FakeProvider {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn create_prediction(
        &self,
        prompt: &str,
        options: &PredictionOptions,
        cancel: &CancellationToken,
    ) -> Result<PredictionOutput, ProviderError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                output_count: options.output_count,
                reference_count: options.reference_images.len(),
            });
            calls.len()
        };
        let prediction_id = format!("pred-{n}");
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancellations.fetch_add(1, Ordering::SeqCst);
                    return Err(ProviderError::Canceled);
                }
                // A closed gate means the test opened it.
                _ = gate.acquire() => {}
            }
        }

        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Failed {
                prediction_id,
                message: "model exploded".into(),
            });
        }

        let output = [FIRST_URI, LAST_URI]
            .into_iter()
            .take(options.output_count.max(1) as usize)
            .map(String::from)
            .collect();
        Ok(PredictionOutput {
            output,
            prediction_id,
            duration: Duration::from_millis(5),
        })
    }

    async fn cancel_prediction(&self, _prediction_id: &str) -> Result<(), ProviderError> {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_image(&self, uri: &str, dest: &Path) -> Result<u64, ProviderError> {
        download_to_path(&reqwest::Client::new(), uri, dest).await
    }
}

// ---------------------------------------------------------------------------
// Fake reindexer and proposers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeReindexer {
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeReindexer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reindexer for FakeReindexer {
    async fn reindex(&self, project_id: &str, shot_id: &str) -> CoreResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((project_id.to_string(), shot_id.to_string()));
        if self.fail {
            return Err(CoreError::Internal("index store offline".into()));
        }
        Ok(())
    }
}

/// Never answers; runs using it stay in `propose_prompt` until canceled.
pub struct PendingProposer;

#[async_trait]
impl ContentProposer for PendingProposer {
    async fn propose(&self, _request: ProposalRequest<'_>) -> CoreResult<String> {
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// Project fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub projects: tempfile::TempDir,
    pub data: tempfile::TempDir,
    pub store: Arc<FsProjectStore>,
    pub locks: Arc<LockManager>,
}

impl Fixture {
    pub fn new() -> Self {
        let projects = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(projects.path().join(PROJECT)).unwrap();
        Self {
            store: Arc::new(FsProjectStore::new(projects.path())),
            locks: Arc::new(LockManager::new()),
            projects,
            data,
        }
    }

    pub fn project_dir(&self) -> PathBuf {
        self.projects.path().join(PROJECT)
    }

    pub fn write(&self, relative: impl AsRef<Path>, bytes: impl AsRef<[u8]>) {
        let path = self.project_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn read(&self, relative: impl AsRef<Path>) -> Option<Vec<u8>> {
        std::fs::read(self.project_dir().join(relative)).ok()
    }

    pub fn write_sequence(&self, sequence: serde_json::Value) {
        self.write("sequence.json", serde_json::to_vec(&sequence).unwrap());
    }

    pub fn write_compiled_prompt(&self, shot_id: &str, variation: Variation, prompt: &str) {
        self.write(
            reelforge_core::project_layout::compiled_prompt(shot_id, variation),
            prompt,
        );
    }

    pub fn job_manager(&self, provider: Arc<FakeProvider>) -> Arc<JobManager> {
        let store: Arc<dyn ProjectStore> = self.store.clone();
        let executor = Arc::new(GenerationExecutor::new(store, provider));
        Arc::new(JobManager::new(Arc::clone(&self.locks), executor).with_data_dir(self.data.path()))
    }

    pub fn coordinator(
        &self,
        proposer: Arc<dyn ContentProposer>,
        reindexer: Arc<dyn Reindexer>,
    ) -> Arc<AgentRunCoordinator> {
        Arc::new(self.bare_coordinator(proposer, reindexer))
    }

    /// Coordinator that also publishes to `bus`.
    pub fn coordinator_on_bus(
        &self,
        proposer: Arc<dyn ContentProposer>,
        reindexer: Arc<dyn Reindexer>,
        bus: Arc<EventBus>,
    ) -> Arc<AgentRunCoordinator> {
        Arc::new(self.bare_coordinator(proposer, reindexer).with_bus(bus))
    }

    fn bare_coordinator(
        &self,
        proposer: Arc<dyn ContentProposer>,
        reindexer: Arc<dyn Reindexer>,
    ) -> AgentRunCoordinator {
        let store: Arc<dyn ProjectStore> = self.store.clone();
        AgentRunCoordinator::new(
            Arc::clone(&self.locks),
            store,
            reindexer,
            proposer,
            Arc::new(TransactionalFileGuard::new(self.data.path())),
        )
    }
}

pub fn shot_input(shot_id: &str, variation: Variation) -> GenerateShotInput {
    GenerateShotInput {
        project_id: PROJECT.into(),
        shot_id: shot_id.into(),
        variation,
        use_continuity: true,
        require_reference: false,
        preview_only: false,
        output_count: 1,
        auto_prepare_references: false,
        aspect_ratio: None,
    }
}

pub fn shot_job(shot_id: &str, variation: Variation) -> JobInput {
    JobInput::GenerateShot(shot_input(shot_id, variation))
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

pub async fn wait_for_job(manager: &JobManager, id: JobId) -> Job {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = manager.get_job(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

pub async fn wait_for_run(coordinator: &AgentRunCoordinator, id: RunId) -> Run {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let run = coordinator.get_run(id).unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run did not finish in time")
}

/// Wait until the run's stream contains `event`.
pub async fn wait_for_run_event(coordinator: &AgentRunCoordinator, id: RunId, event: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let events = coordinator.run_events(id).unwrap();
            if events.iter().any(|e| e.event == event) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("event never arrived")
}
