//! Agent runs: propose, validate and write a shot prompt, revertibly.
//!
//! A run holds the `(project, shot)` lock for its whole life, writes only
//! through the [`TransactionalFileGuard`], and fires the reindex hook after
//! writing. Each step is a cancellation checkpoint and reports what it
//! did on the run's event stream. Finished runs can be reverted, which
//! restores every file the run touched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use reelforge_core::error::{CoreError, CoreResult, ErrorInfo};
use reelforge_core::job_events::{
    FILE_WRITE_PREVIEW, FILE_WRITTEN, LINT_RESULT, RUN_CANCELED, RUN_COMPLETED, RUN_FAILED,
    RUN_REVERTED, RUN_STARTED, TOOL_CALL,
};
use reelforge_core::lock_key::LockKey;
use reelforge_core::project_layout::{self, validate_segment};
use reelforge_core::proposal::ProposalRules;
use reelforge_core::status::{ensure_run_transition, RunStatus};
use reelforge_core::types::{RunId, Timestamp};
use reelforge_events::{
    EventBus, EventHistory, EventScope, Listener, ListenerId, StreamEvent,
    DEFAULT_HISTORY_CAPACITY,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::executor::checkpoint;
use crate::guard::{ManifestHandle, RunMeta, TransactionalFileGuard};
use crate::locks::{LockGuard, LockManager};
use crate::proposer::{ContentProposer, ProposalRequest};
use crate::store::{ProjectStore, Reindexer};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRun {
    pub project_id: String,
    pub shot_id: String,
    #[serde(default)]
    pub instruction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub run_id: RunId,
    pub lock_key: LockKey,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub lock_key: LockKey,
    pub project_id: String,
    pub shot_id: String,
    pub instruction: Option<String>,
    pub status: RunStatus,
    pub error: Option<ErrorInfo>,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub reverted_count: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub project_id: Option<String>,
    pub limit: Option<usize>,
}

struct RunEntry {
    run: Run,
    history: EventHistory,
    cancel: CancellationToken,
    manifest: Option<ManifestHandle>,
}

/// Maximum instruction length accepted by [`AgentRunCoordinator::start_run`].
pub const MAX_INSTRUCTION_CHARS: usize = 4_000;

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct AgentRunCoordinator {
    runs: Mutex<HashMap<RunId, RunEntry>>,
    locks: Arc<LockManager>,
    store: Arc<dyn ProjectStore>,
    reindexer: Arc<dyn Reindexer>,
    proposer: Arc<dyn ContentProposer>,
    guard: Arc<TransactionalFileGuard>,
    rules: ProposalRules,
    bus: Option<Arc<EventBus>>,
    history_capacity: usize,
}

impl AgentRunCoordinator {
    pub fn new(
        locks: Arc<LockManager>,
        store: Arc<dyn ProjectStore>,
        reindexer: Arc<dyn Reindexer>,
        proposer: Arc<dyn ContentProposer>,
        guard: Arc<TransactionalFileGuard>,
    ) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            locks,
            store,
            reindexer,
            proposer,
            guard,
            rules: ProposalRules::default(),
            bus: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_rules(mut self, rules: ProposalRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RunId, RunEntry>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    pub fn start_run(self: &Arc<Self>, request: StartRun) -> CoreResult<StartedRun> {
        validate_segment("projectId", &request.project_id)?;
        validate_segment("shotId", &request.shot_id)?;
        if let Some(instruction) = &request.instruction {
            if instruction.chars().count() > MAX_INSTRUCTION_CHARS {
                return Err(CoreError::Validation(format!(
                    "instruction exceeds {MAX_INSTRUCTION_CHARS} characters"
                )));
            }
        }

        let id = RunId::new_v4();
        let lock_key = LockKey::for_agent_run(&request.project_id, &request.shot_id);
        let lock = self.locks.acquire(&lock_key, id.to_string())?;

        let run = Run {
            id,
            lock_key: lock_key.clone(),
            project_id: request.project_id,
            shot_id: request.shot_id,
            instruction: request.instruction,
            status: RunStatus::Queued,
            error: None,
            created_at: chrono::Utc::now(),
            finished_at: None,
            reverted_count: None,
        };
        let cancel = CancellationToken::new();
        self.table().insert(
            id,
            RunEntry {
                run: run.clone(),
                history: EventHistory::new(self.history_capacity),
                cancel: cancel.clone(),
                manifest: None,
            },
        );
        tracing::info!(run_id = %id, lock_key = %lock_key, "Agent run queued");

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.drive(run, lock, cancel).await;
        });

        Ok(StartedRun {
            run_id: id,
            lock_key,
            status: RunStatus::Queued,
        })
    }

    async fn drive(self: Arc<Self>, run: Run, lock: LockGuard, cancel: CancellationToken) {
        let id = run.id;
        let outcome = self.execute(&run, &cancel).await;

        // Persist the terminal status before the key frees up, so a
        // follow-up run never sees a half-finished manifest.
        let status = match &outcome {
            Ok(()) => RunStatus::Completed,
            Err(e) if e.is_canceled() => RunStatus::Canceled,
            Err(_) => RunStatus::Failed,
        };
        if let Some(handle) = self.manifest(id) {
            if let Err(e) = self.guard.finish(&handle, status).await {
                tracing::error!(run_id = %id, error = %e, "Failed to persist run manifest");
            }
        }
        drop(lock);

        let (event, payload, error) = match outcome {
            Ok(()) => (RUN_COMPLETED, json!({ "status": status }), None),
            Err(e) => {
                let info = e.to_info();
                let payload = json!({
                    "status": status,
                    "code": info.code,
                    "message": info.message,
                });
                let event = if status == RunStatus::Canceled {
                    RUN_CANCELED
                } else {
                    RUN_FAILED
                };
                (event, payload, Some(info))
            }
        };

        match &error {
            None => tracing::info!(run_id = %id, "Agent run completed"),
            Some(info) => tracing::warn!(
                run_id = %id,
                status = %status,
                code = %info.code,
                error = %info.message,
                "Agent run did not complete",
            ),
        }

        if let Err(e) = self.transition(id, status, event, payload, |run| {
            run.finished_at = Some(chrono::Utc::now());
            run.error = error;
        }) {
            tracing::error!(run_id = %id, error = %e, "Failed to finish agent run");
        }
    }

    async fn execute(&self, run: &Run, cancel: &CancellationToken) -> CoreResult<()> {
        let id = run.id;
        let project_id = run.project_id.as_str();
        let shot_id = run.shot_id.as_str();

        checkpoint(cancel, "start")?;
        let project_root = self.store.project_root(project_id).await?;
        let handle = self
            .guard
            .begin_run(RunMeta {
                run_id: id,
                project_id: project_id.to_string(),
                shot_id: shot_id.to_string(),
                project_root,
            })
            .await?;
        if let Some(entry) = self.table().get_mut(&id) {
            entry.manifest = Some(handle.clone());
        }

        self.transition(id, RunStatus::Running, RUN_STARTED, json!({}), |_| {})?;
        tracing::info!(run_id = %id, project_id, shot_id, "Agent run started");

        checkpoint(cancel, "load_shot_context")?;
        self.emit(id, TOOL_CALL, json!({ "tool": "load_shot_context", "shotId": shot_id }));
        let context = self.store.load_shot_context(project_id, shot_id).await?;

        checkpoint(cancel, "propose_prompt")?;
        self.emit(id, TOOL_CALL, json!({ "tool": "propose_prompt", "shotId": shot_id }));
        let request = ProposalRequest {
            context: &context,
            instruction: run.instruction.as_deref(),
            rules: &self.rules,
        };
        let content = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CoreError::Canceled("canceled during proposal".into()));
            }
            proposed = self.proposer.propose(request) => proposed?,
        };

        checkpoint(cancel, "lint")?;
        let report = self.rules.check(&content);
        self.emit(id, LINT_RESULT, json!({ "ok": report.ok, "issues": report.issues }));
        report.into_result()?;

        checkpoint(cancel, "write")?;
        let path = project_layout::shot_prompt(shot_id);
        let path_str = path.to_string_lossy().into_owned();
        self.emit(
            id,
            FILE_WRITE_PREVIEW,
            json!({
                "path": path_str,
                "bytes": content.len(),
                "previousBytes": context.existing_prompt.as_ref().map(String::len),
                "content": content,
            }),
        );
        let record = self.guard.write(&handle, &path_str, content.as_bytes()).await?;
        self.emit(
            id,
            FILE_WRITTEN,
            json!({ "path": path_str, "hashAfter": record.hash_after }),
        );

        checkpoint(cancel, "reindex")?;
        self.emit(id, TOOL_CALL, json!({ "tool": "reindex", "shotId": shot_id }));
        self.reindexer
            .reindex(project_id, shot_id)
            .await
            .map_err(|e| match e {
                CoreError::IndexFailed(_) => e,
                other => CoreError::IndexFailed(other.to_string()),
            })?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // State and events
    // -----------------------------------------------------------------------

    fn manifest(&self, id: RunId) -> Option<ManifestHandle> {
        self.table().get(&id).and_then(|entry| entry.manifest.clone())
    }

    fn transition(
        &self,
        id: RunId,
        to: RunStatus,
        event: &str,
        payload: serde_json::Value,
        apply: impl FnOnce(&mut Run),
    ) -> CoreResult<Run> {
        let (run, recorded) = {
            let mut table = self.table();
            let entry = table
                .get_mut(&id)
                .ok_or_else(|| CoreError::not_found("run", id))?;
            ensure_run_transition(entry.run.status, to)?;
            entry.run.status = to;
            apply(&mut entry.run);
            let recorded = entry
                .history
                .record(StreamEvent::new(event, EventScope::Run, id).with_payload(payload));
            if to.is_terminal() {
                entry.history.clear_listeners();
            }
            (entry.run.clone(), recorded)
        };
        self.publish(recorded);
        Ok(run)
    }

    fn emit(&self, id: RunId, event: &str, payload: serde_json::Value) {
        let recorded = {
            let mut table = self.table();
            let Some(entry) = table.get_mut(&id) else {
                return;
            };
            entry
                .history
                .record(StreamEvent::new(event, EventScope::Run, id).with_payload(payload))
        };
        self.publish(recorded);
    }

    fn publish(&self, event: StreamEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    // -----------------------------------------------------------------------
    // Queries and control
    // -----------------------------------------------------------------------

    pub fn get_run(&self, id: RunId) -> CoreResult<Run> {
        self.table()
            .get(&id)
            .map(|entry| entry.run.clone())
            .ok_or_else(|| CoreError::not_found("run", id))
    }

    /// Runs matching `filter`, newest first.
    pub fn list_runs(&self, filter: &RunFilter) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .table()
            .values()
            .map(|entry| &entry.run)
            .filter(|run| filter.status.map_or(true, |s| run.status == s))
            .filter(|run| {
                filter
                    .project_id
                    .as_deref()
                    .map_or(true, |p| run.project_id == p)
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        runs
    }

    /// Request cancellation. `false` when the run is unknown or finished.
    pub fn cancel_run(&self, id: RunId) -> bool {
        match self.table().get(&id) {
            Some(entry) if !entry.run.status.is_terminal() => {
                entry.cancel.cancel();
                tracing::info!(run_id = %id, "Agent run cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Undo a finished run's writes. A second revert reports 0.
    ///
    /// Runs unknown to this process are reverted from their on-disk
    /// manifest.
    pub async fn revert_run(&self, id: RunId) -> CoreResult<usize> {
        let known = self
            .table()
            .get(&id)
            .map(|entry| (entry.run.clone(), entry.manifest.clone()));

        let (project_id, shot_id, handle) = match known {
            Some((run, handle)) => {
                if !run.status.is_terminal() {
                    return Err(CoreError::Conflict(format!(
                        "Run {id} is {} and cannot be reverted until it finishes",
                        run.status
                    )));
                }
                let Some(handle) = handle else {
                    // Failed before its manifest existed: nothing was written.
                    return Ok(0);
                };
                (run.project_id, run.shot_id, handle)
            }
            None => {
                let handle = self.guard.load(id).await?;
                let manifest = handle.snapshot().await;
                (manifest.project_id, manifest.shot_id, handle)
            }
        };

        let lock_key = LockKey::for_agent_run(&project_id, &shot_id);
        let _lock = self.locks.acquire(&lock_key, format!("revert:{id}"))?;

        let reverted = self.guard.revert(&handle).await?;
        self.guard.finish(&handle, RunStatus::Reverted).await?;

        let status = self.get_run(id).map(|run| run.status).ok();
        if status.is_some_and(RunStatus::is_finished) {
            self.transition(
                id,
                RunStatus::Reverted,
                RUN_REVERTED,
                json!({ "status": RunStatus::Reverted, "revertedCount": reverted }),
                |run| run.reverted_count = Some(reverted),
            )?;
        }
        tracing::info!(run_id = %id, reverted, "Agent run reverted");
        Ok(reverted)
    }

    pub fn run_events(&self, id: RunId) -> CoreResult<Vec<StreamEvent>> {
        self.table()
            .get(&id)
            .map(|entry| entry.history.replay())
            .ok_or_else(|| CoreError::not_found("run", id))
    }

    pub fn subscribe_run(&self, id: RunId, listener: Listener) -> CoreResult<Option<ListenerId>> {
        let mut table = self.table();
        let entry = table
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("run", id))?;
        if entry.run.status.is_terminal() {
            return Ok(None);
        }
        Ok(Some(entry.history.subscribe(listener)))
    }

    pub fn unsubscribe_run(&self, id: RunId, listener: ListenerId) -> bool {
        self.table()
            .get_mut(&id)
            .map_or(false, |entry| entry.history.unsubscribe(listener))
    }

    /// History so far plus a receiver for later events, atomically.
    #[allow(clippy::type_complexity)]
    pub fn subscribe_with_replay(
        &self,
        id: RunId,
    ) -> CoreResult<(Vec<StreamEvent>, mpsc::UnboundedReceiver<StreamEvent>, Option<ListenerId>)> {
        let mut table = self.table();
        let entry = table
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("run", id))?;
        if entry.run.status.is_terminal() {
            let (_, rx) = mpsc::unbounded_channel();
            return Ok((entry.history.replay(), rx, None));
        }
        let (history, listener, rx) = entry.history.replay_and_subscribe();
        Ok((history, rx, Some(listener)))
    }
}
