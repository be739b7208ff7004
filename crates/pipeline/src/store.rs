//! Project file collaborators.
//!
//! [`ProjectStore`] is the read side the resolver, collector and agent
//! depend on; [`Reindexer`] is the hook agent runs fire after writing.
//! [`FsProjectStore`] implements both over the on-disk project layout
//! rooted at `PROJECTS_ROOT/<project>/`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reelforge_core::continuity::{RenderIndex, SequenceRecord};
use reelforge_core::error::{CoreError, CoreResult};
use reelforge_core::project_layout::{self, IMAGE_EXTENSIONS};
use reelforge_core::types::{FrameKind, Variation};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shot records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prominence {
    Primary,
    #[default]
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotCharacter {
    pub id: String,
    #[serde(default)]
    pub prominence: Prominence,
}

/// `shots/<shot>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotRecord {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub characters: Vec<ShotCharacter>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub continuity_disabled: bool,
}

impl ShotRecord {
    /// Character ids with `primary` ones first, declared order kept within
    /// each group.
    pub fn characters_by_prominence(&self) -> Vec<&str> {
        let primary = self
            .characters
            .iter()
            .filter(|c| c.prominence == Prominence::Primary);
        let others = self
            .characters
            .iter()
            .filter(|c| c.prominence != Prominence::Primary);
        primary.chain(others).map(|c| c.id.as_str()).collect()
    }
}

/// What an agent run reads before proposing a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotContext {
    pub project_id: String,
    pub shot_id: String,
    #[serde(flatten)]
    pub record: ShotRecord,
    /// Current `prompts/shots/<shot>.md`, if any.
    pub existing_prompt: Option<String>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Absolute path of `subpath` inside the project. Rejects unsafe ids
    /// and paths escaping the project.
    fn project_path(&self, project_id: &str, subpath: &Path) -> CoreResult<PathBuf>;

    /// Project root, failing with `NOT_FOUND` when the project is absent.
    async fn project_root(&self, project_id: &str) -> CoreResult<PathBuf>;

    async fn read_sequence(&self, project_id: &str) -> CoreResult<SequenceRecord>;

    /// Canonical renders on disk with project-relative paths.
    async fn list_renders(&self, project_id: &str) -> CoreResult<RenderIndex>;

    async fn list_shot_ids(&self, project_id: &str) -> CoreResult<Vec<String>>;

    /// `None` when the shot has no record file.
    async fn load_shot(&self, project_id: &str, shot_id: &str) -> CoreResult<Option<ShotRecord>>;

    async fn load_shot_context(&self, project_id: &str, shot_id: &str) -> CoreResult<ShotContext>;
}

#[async_trait]
pub trait Reindexer: Send + Sync {
    async fn reindex(&self, project_id: &str, shot_id: &str) -> CoreResult<()>;
}

// ---------------------------------------------------------------------------
// Filesystem implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FsProjectStore {
    root: PathBuf,
}

impl FsProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_id: &str) -> CoreResult<PathBuf> {
        project_layout::validate_segment("projectId", project_id)?;
        Ok(self.root.join(project_id))
    }
}

/// Read a file, mapping absence to `None`.
pub(crate) async fn read_optional(path: &Path) -> CoreResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// File names in `dir`, sorted. Missing directories list as empty.
pub(crate) async fn list_dir(dir: &Path) -> CoreResult<Vec<(String, bool)>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        names.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    names.sort();
    Ok(names)
}

fn extension_rank(name: &str) -> Option<usize> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().position(|e| *e == ext)
}

#[async_trait]
impl ProjectStore for FsProjectStore {
    fn project_path(&self, project_id: &str, subpath: &Path) -> CoreResult<PathBuf> {
        let relative = project_layout::normalize_relative(&subpath.to_string_lossy())?;
        Ok(self.project_dir(project_id)?.join(relative))
    }

    async fn project_root(&self, project_id: &str) -> CoreResult<PathBuf> {
        let dir = self.project_dir(project_id)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(CoreError::not_found("project", project_id)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found("project", project_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_sequence(&self, project_id: &str) -> CoreResult<SequenceRecord> {
        let path = self.project_root(project_id).await?.join(project_layout::SEQUENCE_FILE);
        match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CoreError::Validation(format!("Invalid {}: {e}", project_layout::SEQUENCE_FILE))
            }),
            None => Ok(SequenceRecord::default()),
        }
    }

    async fn list_renders(&self, project_id: &str) -> CoreResult<RenderIndex> {
        let root = self.project_root(project_id).await?;
        let mut index = RenderIndex::new();

        for (shot_id, is_dir) in list_dir(&root.join("renders")).await? {
            if !is_dir {
                continue;
            }
            for variation in Variation::ALL {
                let relative_dir = project_layout::render_dir(&shot_id, variation);
                let mut best: [Option<(usize, String)>; 2] = [None, None];

                for (name, is_dir) in list_dir(&root.join(&relative_dir)).await? {
                    if is_dir {
                        continue;
                    }
                    let Some(rank) = extension_rank(&name) else {
                        continue;
                    };
                    let stem = Path::new(&name)
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default();
                    let Some(frame) = FrameKind::from_stem(stem) else {
                        continue;
                    };
                    let slot = &mut best[frame as usize];
                    if slot.as_ref().map_or(true, |(r, _)| rank < *r) {
                        *slot = Some((rank, name));
                    }
                }

                for (frame, found) in [FrameKind::First, FrameKind::Last].into_iter().zip(best) {
                    if let Some((_, name)) = found {
                        index.insert(shot_id.clone(), variation, frame, relative_dir.join(name));
                    }
                }
            }
        }

        Ok(index)
    }

    async fn list_shot_ids(&self, project_id: &str) -> CoreResult<Vec<String>> {
        let root = self.project_root(project_id).await?;
        let mut ids = BTreeSet::new();

        for (name, is_dir) in list_dir(&root.join("shots")).await? {
            if let (false, Some(stem)) = (is_dir, name.strip_suffix(".json")) {
                ids.insert(stem.to_string());
            }
        }
        for (name, is_dir) in list_dir(&root.join("renders")).await? {
            if is_dir {
                ids.insert(name);
            }
        }

        Ok(ids.into_iter().collect())
    }

    async fn load_shot(&self, project_id: &str, shot_id: &str) -> CoreResult<Option<ShotRecord>> {
        project_layout::validate_segment("shotId", shot_id)?;
        let path = self
            .project_root(project_id)
            .await?
            .join(project_layout::shot_record(shot_id));
        match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CoreError::Validation(format!("Invalid shot record {shot_id}: {e}"))),
            None => Ok(None),
        }
    }

    async fn load_shot_context(&self, project_id: &str, shot_id: &str) -> CoreResult<ShotContext> {
        let record = self
            .load_shot(project_id, shot_id)
            .await?
            .ok_or_else(|| CoreError::not_found("shot", shot_id))?;

        let prompt_path = self.project_path(project_id, &project_layout::shot_prompt(shot_id))?;
        let existing_prompt = read_optional(&prompt_path)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        Ok(ShotContext {
            project_id: project_id.to_string(),
            shot_id: shot_id.to_string(),
            record,
            existing_prompt,
        })
    }
}

/// One row of `.index/shots.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotIndexEntry {
    pub shot_id: String,
    pub has_prompt: bool,
    pub render_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotIndex {
    pub updated_at: reelforge_core::types::Timestamp,
    pub shots: Vec<ShotIndexEntry>,
}

#[async_trait]
impl Reindexer for FsProjectStore {
    /// Rebuild the whole project index; `shot_id` is only logged.
    async fn reindex(&self, project_id: &str, shot_id: &str) -> CoreResult<()> {
        let root = self.project_root(project_id).await?;
        let renders = self.list_renders(project_id).await?;

        let mut shots = Vec::new();
        for id in self.list_shot_ids(project_id).await? {
            let has_prompt = tokio::fs::try_exists(root.join(project_layout::shot_prompt(&id)))
                .await
                .unwrap_or(false);
            let render_count = Variation::ALL
                .iter()
                .flat_map(|&v| [(v, FrameKind::First), (v, FrameKind::Last)])
                .filter(|&(v, f)| renders.get(&id, v, f).is_some())
                .count();
            shots.push(ShotIndexEntry {
                shot_id: id,
                has_prompt,
                render_count,
            });
        }

        let index = ShotIndex {
            updated_at: chrono::Utc::now(),
            shots,
        };
        let bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| CoreError::IndexFailed(format!("Failed to encode index: {e}")))?;
        reelforge_provider::download::write_atomic(&root.join(project_layout::shot_index()), &bytes)
            .await
            .map_err(|e| CoreError::IndexFailed(e.to_string()))?;

        tracing::debug!(project_id, shot_id, entries = index.shots.len(), "Project reindexed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn touch(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn fixture() -> (tempfile::TempDir, FsProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("demo")).unwrap();
        let store = FsProjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let (_dir, store) = fixture();
        let err = store.read_sequence("ghost").await.unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "project", .. });
    }

    #[tokio::test]
    async fn missing_sequence_defaults() {
        let (_dir, store) = fixture();
        let seq = store.read_sequence("demo").await.unwrap();
        assert!(seq.editorial_order.is_none());
    }

    #[tokio::test]
    async fn lists_renders_preferring_png() {
        let (dir, store) = fixture();
        let root = dir.path().join("demo");
        touch(&root, "renders/SHOT_01/A/last.jpg", b"j");
        touch(&root, "renders/SHOT_01/A/last.png", b"p");
        touch(&root, "renders/SHOT_01/B/first.webp", b"w");
        touch(&root, "renders/SHOT_01/B/notes.txt", b"n");

        let index = store.list_renders("demo").await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("SHOT_01", Variation::A, FrameKind::Last),
            Some(Path::new("renders/SHOT_01/A/last.png"))
        );
        assert!(index.get("SHOT_01", Variation::B, FrameKind::First).is_some());
    }

    #[tokio::test]
    async fn shot_ids_merge_records_and_renders() {
        let (dir, store) = fixture();
        let root = dir.path().join("demo");
        touch(&root, "shots/SHOT_02.json", b"{}");
        touch(&root, "renders/SHOT_01/A/first.png", b"x");

        let ids = store.list_shot_ids("demo").await.unwrap();
        assert_eq!(ids, vec!["SHOT_01".to_string(), "SHOT_02".to_string()]);
    }

    #[tokio::test]
    async fn shot_context_needs_a_record() {
        let (dir, store) = fixture();
        let root = dir.path().join("demo");
        assert_matches!(
            store.load_shot_context("demo", "SHOT_09").await,
            Err(CoreError::NotFound { entity: "shot", .. })
        );

        touch(
            &root,
            "shots/SHOT_09.json",
            br#"{"intent":"chase","characters":[{"id":"villain"},{"id":"hero","prominence":"primary"}]}"#,
        );
        touch(&root, "prompts/shots/SHOT_09.md", b"# old");

        let ctx = store.load_shot_context("demo", "SHOT_09").await.unwrap();
        assert_eq!(ctx.record.characters_by_prominence(), vec!["hero", "villain"]);
        assert_eq!(ctx.existing_prompt.as_deref(), Some("# old"));
    }

    #[test]
    fn project_path_rejects_escape() {
        let (_dir, store) = fixture();
        assert!(store.project_path("demo", Path::new("../other/x")).is_err());
        assert!(store.project_path("../demo", Path::new("x")).is_err());
    }

    #[tokio::test]
    async fn reindex_writes_index_file() {
        let (dir, store) = fixture();
        let root = dir.path().join("demo");
        touch(&root, "shots/SHOT_01.json", b"{}");
        touch(&root, "prompts/shots/SHOT_01.md", b"# p");
        touch(&root, "renders/SHOT_01/A/first.png", b"x");

        store.reindex("demo", "SHOT_01").await.unwrap();

        let raw = std::fs::read(root.join(".index/shots.json")).unwrap();
        let index: ShotIndex = serde_json::from_slice(&raw).unwrap();
        assert_eq!(index.shots.len(), 1);
        assert!(index.shots[0].has_prompt);
        assert_eq!(index.shots[0].render_count, 1);
    }
}
