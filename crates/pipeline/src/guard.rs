//! Snapshot-backed, revertible writes into project files.
//!
//! Every agent run gets a manifest under `<data_dir>/runs/<runId>/`. Each
//! write first copies the bytes it is about to overwrite into
//! `snapshots/<index>.snap`, then persists a pending [`WriteRecord`], and
//! only then replaces the target through a temp file and rename. The
//! manifest on disk therefore names every target that may have changed.
//! [`TransactionalFileGuard::revert`] walks the records backwards and puts
//! every touched path back the way it was before the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelforge_core::error::{CoreError, CoreResult};
use reelforge_core::hashing::content_hash;
use reelforge_core::project_layout::normalize_relative;
use reelforge_core::status::RunStatus;
use reelforge_core::types::{RunId, Timestamp};
use reelforge_provider::download::write_atomic;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::store::read_optional;

/// Prefixes agent writes may target unless configured otherwise.
pub const DEFAULT_ALLOWED_PREFIXES: &[&str] = &["prompts", "shots"];

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SNAPSHOT_DIR: &str = "snapshots";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteResult {
    /// Recorded before the target was touched; the write may or may not
    /// have landed. Reverted like a completed write.
    Pending,
    Written,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRecord {
    pub index: usize,
    /// Project-relative target.
    pub path: PathBuf,
    pub existed_before: bool,
    pub snapshot_path: Option<PathBuf>,
    pub hash_after: String,
    pub written_at: Timestamp,
    pub result: WriteResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Rollback {
    NotRequested,
    Reverted { at: Timestamp, reverted_count: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub run_id: RunId,
    pub project_id: String,
    pub shot_id: String,
    pub project_root: PathBuf,
    pub status: RunStatus,
    pub writes: Vec<WriteRecord>,
    pub rollback: Rollback,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Identity of a run passed to [`TransactionalFileGuard::begin_run`].
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: RunId,
    pub project_id: String,
    pub shot_id: String,
    pub project_root: PathBuf,
}

/// Shared handle to a live manifest. Writes through one handle are
/// serialized by its mutex.
#[derive(Clone, Debug)]
pub struct ManifestHandle {
    run_id: RunId,
    run_dir: PathBuf,
    manifest: Arc<Mutex<RunManifest>>,
}

impl ManifestHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub async fn snapshot(&self) -> RunManifest {
        self.manifest.lock().await.clone()
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

pub struct TransactionalFileGuard {
    data_dir: PathBuf,
    allowed_prefixes: Vec<PathBuf>,
}

impl TransactionalFileGuard {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            allowed_prefixes: DEFAULT_ALLOWED_PREFIXES.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn with_allowed_prefixes<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.allowed_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.data_dir.join("runs").join(run_id.to_string())
    }

    pub async fn begin_run(&self, meta: RunMeta) -> CoreResult<ManifestHandle> {
        let run_dir = self.run_dir(meta.run_id);
        tokio::fs::create_dir_all(run_dir.join(SNAPSHOT_DIR)).await?;

        let now = chrono::Utc::now();
        let manifest = RunManifest {
            run_id: meta.run_id,
            project_id: meta.project_id,
            shot_id: meta.shot_id,
            project_root: meta.project_root,
            status: RunStatus::Running,
            writes: Vec::new(),
            rollback: Rollback::NotRequested,
            created_at: now,
            updated_at: now,
        };
        persist_manifest(&run_dir, &manifest).await?;
        tracing::debug!(run_id = %meta.run_id, run_dir = %run_dir.display(), "Run manifest created");

        Ok(ManifestHandle {
            run_id: meta.run_id,
            run_dir,
            manifest: Arc::new(Mutex::new(manifest)),
        })
    }

    /// Re-open a manifest written by an earlier process.
    pub async fn load(&self, run_id: RunId) -> CoreResult<ManifestHandle> {
        let run_dir = self.run_dir(run_id);
        let bytes = read_optional(&run_dir.join(MANIFEST_FILE))
            .await?
            .ok_or_else(|| CoreError::not_found("run manifest", run_id))?;
        let manifest: RunManifest = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Internal(format!("Corrupt manifest for run {run_id}: {e}")))?;

        Ok(ManifestHandle {
            run_id,
            run_dir,
            manifest: Arc::new(Mutex::new(manifest)),
        })
    }

    /// Validate `relative` against the allow-list.
    pub fn check_path(&self, relative: &str) -> CoreResult<PathBuf> {
        let normalized = normalize_relative(relative)?;
        let allowed = self
            .allowed_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix) && normalized != *prefix);
        if !allowed {
            return Err(CoreError::Validation(format!(
                "Path '{relative}' is outside the writable area"
            )));
        }
        Ok(normalized)
    }

    pub async fn write(
        &self,
        handle: &ManifestHandle,
        relative: &str,
        content: &[u8],
    ) -> CoreResult<WriteRecord> {
        let path = self.check_path(relative)?;
        let mut manifest = handle.manifest.lock().await;
        let target = manifest.project_root.join(&path);
        let index = manifest.writes.len();

        let previous = read_optional(&target).await?;
        let snapshot_path = match &previous {
            Some(bytes) => {
                let snapshot = PathBuf::from(SNAPSHOT_DIR).join(format!("{index}.snap"));
                write_atomic(&handle.run_dir.join(&snapshot), bytes).await?;
                Some(snapshot)
            }
            None => None,
        };

        manifest.writes.push(WriteRecord {
            index,
            path,
            existed_before: previous.is_some(),
            snapshot_path,
            hash_after: content_hash(content),
            written_at: chrono::Utc::now(),
            result: WriteResult::Pending,
        });
        if let Err(e) = persist_manifest(&handle.run_dir, &manifest).await {
            manifest.writes.pop();
            return Err(e);
        }

        write_atomic(&target, content).await?;

        manifest.writes[index].result = WriteResult::Written;
        manifest.updated_at = chrono::Utc::now();
        persist_manifest(&handle.run_dir, &manifest).await?;
        let record = manifest.writes[index].clone();

        tracing::info!(
            run_id = %handle.run_id,
            path = %record.path.display(),
            existed_before = record.existed_before,
            bytes = content.len(),
            "Guarded write",
        );
        Ok(record)
    }

    /// Undo every un-reverted write, newest first. Returns how many were
    /// undone by this call.
    pub async fn revert(&self, handle: &ManifestHandle) -> CoreResult<usize> {
        let mut manifest = handle.manifest.lock().await;
        let root = manifest.project_root.clone();
        let mut reverted = 0;

        for i in (0..manifest.writes.len()).rev() {
            if manifest.writes[i].result == WriteResult::Reverted {
                continue;
            }
            let record = &manifest.writes[i];
            let target = root.join(&record.path);

            match (&record.snapshot_path, record.existed_before) {
                (Some(snapshot), true) => {
                    let bytes = read_optional(&handle.run_dir.join(snapshot))
                        .await?
                        .ok_or_else(|| {
                            CoreError::Internal(format!(
                                "Snapshot {} missing for run {}",
                                snapshot.display(),
                                handle.run_id
                            ))
                        })?;
                    write_atomic(&target, &bytes).await?;
                }
                _ => match tokio::fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
            }

            manifest.writes[i].result = WriteResult::Reverted;
            reverted += 1;
            // Persist per record so a crash mid-revert leaves an accurate manifest.
            persist_manifest(&handle.run_dir, &manifest).await?;
        }

        if reverted > 0 {
            let now = chrono::Utc::now();
            manifest.rollback = Rollback::Reverted {
                at: now,
                reverted_count: reverted,
            };
            manifest.updated_at = now;
            persist_manifest(&handle.run_dir, &manifest).await?;
        }

        tracing::info!(run_id = %handle.run_id, reverted, "Run reverted");
        Ok(reverted)
    }

    /// Record the run's final status in its manifest.
    pub async fn finish(&self, handle: &ManifestHandle, status: RunStatus) -> CoreResult<()> {
        let mut manifest = handle.manifest.lock().await;
        manifest.status = status;
        manifest.updated_at = chrono::Utc::now();
        persist_manifest(&handle.run_dir, &manifest).await
    }
}

async fn persist_manifest(run_dir: &Path, manifest: &RunManifest) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(manifest)
        .map_err(|e| CoreError::Internal(format!("Failed to encode manifest: {e}")))?;
    write_atomic(&run_dir.join(MANIFEST_FILE), &bytes).await?;
    Ok(())
}
