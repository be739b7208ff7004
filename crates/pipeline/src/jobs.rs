//! Job lifecycle: admission, execution tasks, event streams, retries.
//!
//! [`JobManager::create_job`] validates, takes the resource lock and spawns
//! one tokio task per job before returning. The task releases the lock
//! before it publishes the terminal state, so a caller that observes a
//! finished job can immediately create the next one on the same key.
//!
//! All job records and their event histories live behind one table mutex.
//! Listeners are invoked while it is held and must not call back into the
//! manager.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use reelforge_core::error::{CoreError, CoreResult, ErrorInfo};
use reelforge_core::generation::{JobInput, JobResult, JobType, PromotionResult};
use reelforge_core::job_events::{
    JOB_CANCELED, JOB_COMPLETED, JOB_FAILED, JOB_QUEUED, JOB_STARTED,
};
use reelforge_core::lock_key::LockKey;
use reelforge_core::status::{ensure_job_transition, JobStatus};
use reelforge_core::types::{JobId, Timestamp};
use reelforge_events::{
    EventBus, EventHistory, EventScope, EventSink, Listener, ListenerId, StreamEvent,
    DEFAULT_HISTORY_CAPACITY,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::executor::{GenerationExecutor, JobContext};
use crate::locks::{LockGuard, LockManager};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub lock_key: LockKey,
    pub job_type: JobType,
    pub status: JobStatus,
    pub input: JobInput,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub result: Option<JobResult>,
    pub error: Option<ErrorInfo>,
    pub retry_of: Option<JobId>,
}

/// Returned by [`JobManager::create_job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub job_id: JobId,
    pub lock_key: LockKey,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub project_id: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.job_type.map_or(true, |t| job.job_type == t)
            && self
                .project_id
                .as_deref()
                .map_or(true, |p| job.input.project_id() == p)
    }
}

/// Handle for removing a listener added with [`JobManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub job_id: JobId,
    listener: Option<ListenerId>,
}

struct JobEntry {
    job: Job,
    history: EventHistory,
    cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct JobManager {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    locks: Arc<LockManager>,
    executor: Arc<GenerationExecutor>,
    bus: Option<Arc<EventBus>>,
    data_dir: Option<PathBuf>,
    history_capacity: usize,
}

impl JobManager {
    pub fn new(locks: Arc<LockManager>, executor: Arc<GenerationExecutor>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            locks,
            executor,
            bus: None,
            data_dir: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    /// Also publish every event on the process-wide bus.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Persist `jobs/<id>/job.json` under `data_dir` on every transition.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    fn table(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Admit a job and start its task. Validation, auth and lock failures
    /// return synchronously without creating anything.
    pub fn create_job(self: &Arc<Self>, input: JobInput) -> CoreResult<CreatedJob> {
        self.admit(input, None)
    }

    /// Start a new job from a terminal one, with `overrides` deep-merged
    /// over its input.
    pub fn retry_job(
        self: &Arc<Self>,
        source_id: JobId,
        overrides: &serde_json::Value,
    ) -> CoreResult<CreatedJob> {
        let source = self.get_job(source_id)?;
        if !source.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {source_id} is {} and cannot be retried until it finishes",
                source.status
            )));
        }
        let input = source.input.with_overrides(overrides)?;
        tracing::info!(source_job_id = %source_id, "Retrying job");
        self.admit(input, Some(source_id))
    }

    fn admit(self: &Arc<Self>, input: JobInput, retry_of: Option<JobId>) -> CoreResult<CreatedJob> {
        input.validate()?;
        if !self.executor.provider_configured() {
            return Err(CoreError::AuthRequired(
                "Image provider is not configured".into(),
            ));
        }

        let id = JobId::new_v4();
        let lock_key = input.lock_key(id);
        let guard = self.locks.acquire(&lock_key, id.to_string())?;

        let job = Job {
            id,
            lock_key: lock_key.clone(),
            job_type: input.job_type(),
            status: JobStatus::Queued,
            input: input.clone(),
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            retry_of,
        };
        let cancel = CancellationToken::new();

        let queued = {
            let mut table = self.table();
            let mut history = EventHistory::new(self.history_capacity);
            let event = history.record(
                StreamEvent::new(JOB_QUEUED, EventScope::Job, id).with_payload(json!({
                    "status": JobStatus::Queued,
                    "jobType": job.job_type,
                    "lockKey": lock_key,
                })),
            );
            table.insert(
                id,
                JobEntry {
                    job,
                    history,
                    cancel: cancel.clone(),
                },
            );
            event
        };
        self.publish(queued);

        tracing::info!(
            job_id = %id,
            lock_key = %lock_key,
            job_type = %input.job_type(),
            "Job queued",
        );

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_job(id, input, guard, cancel).await;
        });

        Ok(CreatedJob {
            job_id: id,
            lock_key,
            status: JobStatus::Queued,
        })
    }

    // -----------------------------------------------------------------------
    // Task body
    // -----------------------------------------------------------------------

    async fn run_job(
        self: Arc<Self>,
        id: JobId,
        input: JobInput,
        guard: LockGuard,
        cancel: CancellationToken,
    ) {
        self.persist_snapshot(id).await;

        if cancel.is_cancelled() {
            drop(guard);
            self.finish(
                id,
                JobStatus::Canceled,
                Err(CoreError::Canceled("canceled before start".into())),
            )
            .await;
            return;
        }

        if let Err(e) = self.transition(id, JobStatus::Running, JOB_STARTED, json!({}), |job| {
            job.started_at = Some(chrono::Utc::now());
        }) {
            tracing::error!(job_id = %id, error = %e, "Failed to start job");
            return;
        }
        self.persist_snapshot(id).await;
        tracing::info!(job_id = %id, "Job started");

        let sink = JobEvents {
            manager: Arc::clone(&self),
            job_id: id,
        };
        let ctx = JobContext {
            job_id: id,
            cancel: &cancel,
            events: &sink,
        };

        let outcome = AssertUnwindSafe(self.executor.execute(&input, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(CoreError::Internal("job task panicked".into())));

        // The key must be free before anyone can observe the terminal state.
        drop(guard);

        let status = match &outcome {
            Ok(_) => JobStatus::Completed,
            Err(e) if e.is_canceled() => JobStatus::Canceled,
            Err(_) => JobStatus::Failed,
        };
        self.finish(id, status, outcome).await;
    }

    async fn finish(&self, id: JobId, status: JobStatus, outcome: CoreResult<JobResult>) {
        let (event, payload, result, error) = match outcome {
            Ok(result) => {
                let payload = json!({ "status": status, "result": result });
                (JOB_COMPLETED, payload, Some(result), None)
            }
            Err(e) => {
                let info = e.to_info();
                let payload = json!({
                    "status": status,
                    "code": info.code,
                    "message": info.message,
                });
                let event = if status == JobStatus::Canceled {
                    JOB_CANCELED
                } else {
                    JOB_FAILED
                };
                (event, payload, None, Some(info))
            }
        };

        let transitioned = self.transition(id, status, event, payload, |job| {
            job.finished_at = Some(chrono::Utc::now());
            job.result = result;
            job.error = error;
        });

        match transitioned {
            Ok(job) => {
                match &job.error {
                    None => tracing::info!(job_id = %id, "Job completed"),
                    Some(info) if status == JobStatus::Canceled => {
                        tracing::info!(job_id = %id, reason = %info.message, "Job canceled")
                    }
                    Some(info) => tracing::warn!(
                        job_id = %id,
                        code = %info.code,
                        error = %info.message,
                        "Job failed",
                    ),
                }
                self.persist_snapshot(id).await;
            }
            Err(e) => tracing::error!(job_id = %id, error = %e, "Failed to finish job"),
        }
    }

    /// Apply a status change and record its event under one lock hold.
    fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        event: &str,
        payload: serde_json::Value,
        apply: impl FnOnce(&mut Job),
    ) -> CoreResult<Job> {
        let (job, recorded) = {
            let mut table = self.table();
            let entry = table
                .get_mut(&id)
                .ok_or_else(|| CoreError::not_found("job", id))?;
            ensure_job_transition(entry.job.status, to)?;
            entry.job.status = to;
            apply(&mut entry.job);

            let mut payload = payload;
            if let Some(map) = payload.as_object_mut() {
                map.entry("status").or_insert(json!(to));
            }
            let recorded = entry
                .history
                .record(StreamEvent::new(event, EventScope::Job, id).with_payload(payload));
            if to.is_terminal() {
                entry.history.clear_listeners();
            }
            (entry.job.clone(), recorded)
        };
        self.publish(recorded);
        Ok(job)
    }

    fn record_event(&self, id: JobId, event: &str, payload: serde_json::Value) {
        let recorded = {
            let mut table = self.table();
            let Some(entry) = table.get_mut(&id) else {
                return;
            };
            if entry.job.status.is_terminal() {
                return;
            }
            entry
                .history
                .record(StreamEvent::new(event, EventScope::Job, id).with_payload(payload))
        };
        self.publish(recorded);
    }

    fn publish(&self, event: StreamEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    async fn persist_snapshot(&self, id: JobId) {
        let Some(data_dir) = &self.data_dir else {
            return;
        };
        let Ok(job) = self.get_job(id) else {
            return;
        };
        let path = data_dir.join("jobs").join(id.to_string()).join("job.json");
        let result = match serde_json::to_vec_pretty(&job) {
            Ok(bytes) => reelforge_provider::download::write_atomic(&path, &bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(job_id = %id, error = %e, "Failed to persist job snapshot");
        }
    }

    // -----------------------------------------------------------------------
    // Queries and control
    // -----------------------------------------------------------------------

    pub fn get_job(&self, id: JobId) -> CoreResult<Job> {
        self.table()
            .get(&id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| CoreError::not_found("job", id))
    }

    /// Jobs matching `filter`, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .table()
            .values()
            .filter(|entry| filter.matches(&entry.job))
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Request cancellation. `false` when the job is unknown or finished.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let table = self.table();
        match table.get(&id) {
            Some(entry) if !entry.job.status.is_terminal() => {
                entry.cancel.cancel();
                tracing::info!(job_id = %id, "Job cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Retained events of a job, oldest first.
    pub fn job_events(&self, id: JobId) -> CoreResult<Vec<StreamEvent>> {
        self.table()
            .get(&id)
            .map(|entry| entry.history.replay())
            .ok_or_else(|| CoreError::not_found("job", id))
    }

    pub fn subscribe(&self, id: JobId, listener: Listener) -> CoreResult<Subscription> {
        let mut table = self.table();
        let entry = table
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("job", id))?;
        let listener = (!entry.job.status.is_terminal()).then(|| entry.history.subscribe(listener));
        Ok(Subscription {
            job_id: id,
            listener,
        })
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let Some(listener) = subscription.listener else {
            return false;
        };
        self.table()
            .get_mut(&subscription.job_id)
            .map_or(false, |entry| entry.history.unsubscribe(listener))
    }

    /// History so far plus a receiver for everything after it, taken
    /// atomically. For finished jobs the receiver is already closed.
    pub fn subscribe_with_replay(
        &self,
        id: JobId,
    ) -> CoreResult<(Vec<StreamEvent>, mpsc::UnboundedReceiver<StreamEvent>, Subscription)> {
        let mut table = self.table();
        let entry = table
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("job", id))?;

        if entry.job.status.is_terminal() {
            let (_, rx) = mpsc::unbounded_channel();
            let subscription = Subscription {
                job_id: id,
                listener: None,
            };
            return Ok((entry.history.replay(), rx, subscription));
        }

        let (history, listener, rx) = entry.history.replay_and_subscribe();
        Ok((
            history,
            rx,
            Subscription {
                job_id: id,
                listener: Some(listener),
            },
        ))
    }

    /// Copy a completed preview job's outputs into the canonical slots.
    pub async fn promote_preview(&self, id: JobId) -> CoreResult<PromotionResult> {
        let job = self.get_job(id)?;
        if job.status != JobStatus::Completed {
            return Err(CoreError::Conflict(format!(
                "Job {id} is {} and has no outputs to promote",
                job.status
            )));
        }
        let (JobInput::GenerateShot(input), Some(JobResult::GenerateShot(result))) =
            (&job.input, &job.result)
        else {
            return Err(CoreError::Validation(format!(
                "Job {id} is not a shot generation"
            )));
        };
        if !result.preview_only {
            return Err(CoreError::Validation(format!(
                "Job {id} wrote canonical frames; nothing to promote"
            )));
        }

        let _guard = self.locks.acquire(&job.lock_key, id.to_string())?;
        self.executor
            .promote_preview(
                &input.project_id,
                &input.shot_id,
                input.variation,
                id,
                &result.outputs,
            )
            .await
    }
}

/// Routes executor progress into the job's stream.
struct JobEvents {
    manager: Arc<JobManager>,
    job_id: JobId,
}

impl EventSink for JobEvents {
    fn emit(&self, event: &str, payload: serde_json::Value) {
        self.manager.record_event(self.job_id, event, payload);
    }
}
