//! Reference image collection for shot generation.
//!
//! Candidates are gathered in fixed priority order: the continuity frame,
//! the shot's reference set, per-character canon, then location canon.
//! Each is read, embedded as a data URI and offered to a
//! [`ReferenceSetBuilder`], which drops duplicates and stops at the cap.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelforge_core::error::CoreResult;
use reelforge_core::project_layout::{self, is_image_path, mime_for_path, IMAGE_EXTENSIONS};
use reelforge_core::references::{
    PushOutcome, ReferenceCandidate, ReferenceSetBuilder, ReferenceSourceType,
    CHARACTER_REFERENCE_STEMS,
};
use reelforge_core::types::Variation;

use crate::store::{list_dir, read_optional, ProjectStore, ShotRecord};

/// The frame continuity seeds a shot with.
#[derive(Debug, Clone, Copy)]
pub struct ContinuityFrame<'a> {
    /// Project-relative path of the frame.
    pub path: &'a Path,
    /// Shot the frame was rendered for.
    pub source_shot_id: &'a str,
}

/// What to collect for one shot call.
#[derive(Debug, Clone)]
pub struct ReferenceRequest<'a> {
    pub project_id: &'a str,
    pub shot_id: &'a str,
    pub variation: Variation,
    /// Present when continuity applies.
    pub continuity_frame: Option<ContinuityFrame<'a>>,
    /// Assemble a reference set from canon folders when none was uploaded.
    pub auto_prepare: bool,
    pub shot: Option<&'a ShotRecord>,
}

#[derive(Debug, Clone)]
pub struct CollectedReferences {
    pub references: Vec<ReferenceCandidate>,
    /// Files copied into the reference set directory by auto-preparation.
    pub prepared_count: usize,
    pub duplicates_skipped: usize,
}

#[derive(Clone)]
pub struct ReferenceCollector {
    store: Arc<dyn ProjectStore>,
}

/// A file found on disk for a given source.
struct Found {
    source_type: ReferenceSourceType,
    source_id: String,
    relative: PathBuf,
}

impl ReferenceCollector {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    pub async fn collect(&self, request: &ReferenceRequest<'_>) -> CoreResult<CollectedReferences> {
        let root = self.store.project_root(request.project_id).await?;
        let mut builder = ReferenceSetBuilder::default();
        let mut duplicates_skipped = 0;
        let mut prepared_count = 0;

        let mut ordered: Vec<Found> = Vec::new();

        // 1. Continuity frame.
        if let Some(frame) = request.continuity_frame {
            ordered.push(Found {
                source_type: ReferenceSourceType::Continuity,
                source_id: frame.source_shot_id.to_string(),
                relative: frame.path.to_path_buf(),
            });
        }

        // 2. Uploaded reference set, auto-prepared if empty.
        let set_dir = project_layout::reference_set_dir(request.shot_id, request.variation);
        let mut uploaded = image_files(&root, &set_dir).await?;
        if uploaded.is_empty() && request.auto_prepare {
            if let Some(shot) = request.shot {
                prepared_count = self.prepare_set(&root, &set_dir, shot).await?;
                uploaded = image_files(&root, &set_dir).await?;
            }
        }
        let set_id = format!("{}/{}", request.shot_id, request.variation);
        ordered.extend(uploaded.into_iter().map(|relative| Found {
            source_type: ReferenceSourceType::UploadedRefSet,
            source_id: set_id.clone(),
            relative,
        }));

        if let Some(shot) = request.shot {
            // 3. Character canon, primary characters first.
            for character_id in shot.characters_by_prominence() {
                for relative in character_files(&root, character_id).await? {
                    ordered.push(Found {
                        source_type: ReferenceSourceType::Character,
                        source_id: character_id.to_string(),
                        relative,
                    });
                }
            }

            // 4. Location canon.
            if let Some(location_id) = shot.location.as_deref() {
                for relative in location_files(&root, location_id).await? {
                    ordered.push(Found {
                        source_type: ReferenceSourceType::Location,
                        source_id: location_id.to_string(),
                        relative,
                    });
                }
            }
        }

        for found in ordered {
            if builder.is_full() {
                break;
            }
            let Some(bytes) = read_optional(&root.join(&found.relative)).await? else {
                continue;
            };
            let mime = mime_for_path(&found.relative);
            let candidate = ReferenceCandidate::from_bytes(
                found.source_type,
                found.source_id,
                Some(found.relative),
                &bytes,
                mime,
            );
            match builder.push(candidate) {
                PushOutcome::Added => {}
                PushOutcome::Duplicate => duplicates_skipped += 1,
                PushOutcome::Full => break,
            }
        }

        let references = builder.finish();
        tracing::debug!(
            project_id = request.project_id,
            shot_id = request.shot_id,
            variation = %request.variation,
            collected = references.len(),
            duplicates_skipped,
            prepared_count,
            "References collected",
        );

        Ok(CollectedReferences {
            references,
            prepared_count,
            duplicates_skipped,
        })
    }

    /// Copy the first canon image of each character and the location into
    /// `set_dir`. Returns the number of files copied.
    async fn prepare_set(&self, root: &Path, set_dir: &Path, shot: &ShotRecord) -> CoreResult<usize> {
        let mut picks: Vec<(String, PathBuf)> = Vec::new();
        for character_id in shot.characters_by_prominence() {
            if let Some(first) = character_files(root, character_id).await?.into_iter().next() {
                picks.push((character_id.to_string(), first));
            }
        }
        if let Some(location_id) = shot.location.as_deref() {
            if let Some(first) = location_files(root, location_id).await?.into_iter().next() {
                picks.push((location_id.to_string(), first));
            }
        }
        if picks.is_empty() {
            return Ok(0);
        }

        let target_dir = root.join(set_dir);
        tokio::fs::create_dir_all(&target_dir).await?;
        for (i, (source_id, relative)) in picks.iter().enumerate() {
            let name = relative
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dest = target_dir.join(format!("{:02}_{source_id}_{name}", i + 1));
            tokio::fs::copy(root.join(relative), &dest).await?;
        }

        tracing::info!(
            set_dir = %set_dir.display(),
            copied = picks.len(),
            "Auto-prepared reference set",
        );
        Ok(picks.len())
    }
}

/// Image files directly under `dir` (project-relative), sorted by name.
async fn image_files(root: &Path, dir: &Path) -> CoreResult<Vec<PathBuf>> {
    Ok(list_dir(&root.join(dir))
        .await?
        .into_iter()
        .filter(|(name, is_dir)| !is_dir && is_image_path(Path::new(name)))
        .map(|(name, _)| dir.join(name))
        .collect())
}

/// Canon images of a location, sorted by name.
async fn location_files(root: &Path, location_id: &str) -> CoreResult<Vec<PathBuf>> {
    if project_layout::validate_segment("locationId", location_id).is_err() {
        tracing::warn!(location_id, "Skipping location with unsafe id");
        return Ok(Vec::new());
    }
    image_files(root, &project_layout::location_refs_dir(location_id)).await
}

/// Existing canon files for a character, in candidate-list order.
async fn character_files(root: &Path, character_id: &str) -> CoreResult<Vec<PathBuf>> {
    if project_layout::validate_segment("characterId", character_id).is_err() {
        tracing::warn!(character_id, "Skipping character with unsafe id");
        return Ok(Vec::new());
    }
    let dir = project_layout::character_refs_dir(character_id);
    let present: Vec<String> = list_dir(&root.join(&dir))
        .await?
        .into_iter()
        .filter(|(_, is_dir)| !is_dir)
        .map(|(name, _)| name)
        .collect();

    let mut files = Vec::new();
    for stem in CHARACTER_REFERENCE_STEMS {
        for ext in IMAGE_EXTENSIONS {
            let name = format!("{stem}.{ext}");
            if present.contains(&name) {
                files.push(dir.join(name));
            }
        }
    }
    Ok(files)
}
