//! On-disk project layout conventions.
//!
//! Every helper returns a path *relative to the project root*; resolving
//! against an actual root is the project store's job.

use std::path::{Component, Path, PathBuf};

use crate::error::CoreError;
use crate::types::{FrameKind, JobId, Variation};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Sequence record holding editorial order and variation selections.
pub const SEQUENCE_FILE: &str = "sequence.json";

/// Image extensions recognised for renders and references, in lookup order.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Extension used for every image this system writes.
pub const OUTPUT_EXTENSION: &str = "png";

/// Subfolder under a shot variation that holds unpromoted outputs.
pub const PREVIEW_DIR: &str = "preview";

/// Maximum length of a single id used as a path segment.
pub const MAX_SEGMENT_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Segment validation
// ---------------------------------------------------------------------------

/// Validate an identifier that will be joined into a filesystem path.
///
/// Accepts ASCII letters, digits, `-`, `_` and `.`, but never `.` or `..`
/// on their own.
pub fn validate_segment(field: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > MAX_SEGMENT_LEN {
        return Err(CoreError::Validation(format!(
            "{field} must be 1-{MAX_SEGMENT_LEN} characters"
        )));
    }
    if value == "." || value == ".." {
        return Err(CoreError::Validation(format!(
            "{field} must not be a relative path component"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CoreError::Validation(format!(
            "{field} '{value}' contains characters outside [A-Za-z0-9._-]"
        )));
    }
    Ok(())
}

/// Normalize a caller-supplied relative path.
///
/// Rejects absolute paths, `..`, and empty paths; strips `.` components.
pub fn normalize_relative(path: &str) -> Result<PathBuf, CoreError> {
    let raw = Path::new(path);
    let mut out = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(CoreError::Validation(format!(
                    "Path '{path}' must not contain '..'"
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::Validation(format!(
                    "Path '{path}' must be relative to the project root"
                )))
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(CoreError::Validation("Path must not be empty".into()));
    }
    Ok(out)
}

/// MIME type for an image path, by extension. Defaults to PNG.
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Path builders
// ---------------------------------------------------------------------------

pub fn shot_record(shot_id: &str) -> PathBuf {
    PathBuf::from("shots").join(format!("{shot_id}.json"))
}

/// Pre-compiled prompt body for one shot variation.
pub fn compiled_prompt(shot_id: &str, variation: Variation) -> PathBuf {
    PathBuf::from("prompts")
        .join("compiled")
        .join(shot_id)
        .join(format!("{variation}.txt"))
}

/// Editable shot prompt; the target agent runs rewrite.
pub fn shot_prompt(shot_id: &str) -> PathBuf {
    PathBuf::from("prompts").join("shots").join(format!("{shot_id}.md"))
}

/// Directory holding the canonical renders for one shot variation.
pub fn render_dir(shot_id: &str, variation: Variation) -> PathBuf {
    PathBuf::from("renders").join(shot_id).join(variation.as_str())
}

/// Canonical output path for a rendered frame.
pub fn render_frame(shot_id: &str, variation: Variation, frame: FrameKind) -> PathBuf {
    render_dir(shot_id, variation).join(format!("{frame}.{OUTPUT_EXTENSION}"))
}

/// Directory holding one job's preview outputs.
pub fn preview_dir(shot_id: &str, variation: Variation, job_id: JobId) -> PathBuf {
    render_dir(shot_id, variation)
        .join(PREVIEW_DIR)
        .join(job_id.to_string())
}

pub fn preview_frame(
    shot_id: &str,
    variation: Variation,
    job_id: JobId,
    frame: FrameKind,
) -> PathBuf {
    preview_dir(shot_id, variation, job_id).join(format!("{frame}.{OUTPUT_EXTENSION}"))
}

/// Uploaded (or auto-prepared) reference set for one shot variation.
pub fn reference_set_dir(shot_id: &str, variation: Variation) -> PathBuf {
    PathBuf::from("references")
        .join(shot_id)
        .join(variation.as_str())
}

pub fn character_refs_dir(character_id: &str) -> PathBuf {
    PathBuf::from("characters").join(character_id).join("refs")
}

pub fn character_slot_prompt(character_id: &str, slot: &str) -> PathBuf {
    character_refs_dir(character_id).join(format!("{slot}.prompt.txt"))
}

pub fn character_slot_image(character_id: &str, slot: &str) -> PathBuf {
    character_refs_dir(character_id).join(format!("{slot}.{OUTPUT_EXTENSION}"))
}

pub fn location_refs_dir(location_id: &str) -> PathBuf {
    PathBuf::from("locations").join(location_id).join("refs")
}

/// Output folder for free-form image generation.
pub fn scratch_dir() -> PathBuf {
    PathBuf::from("scratch").join("generated")
}

/// Index file rewritten by the filesystem reindexer.
pub fn shot_index() -> PathBuf {
    PathBuf::from(".index").join("shots.json")
}

/// Turn a free-form hint into a filename-safe slug (max 40 chars).
pub fn slugify(hint: &str) -> String {
    let mut slug = String::with_capacity(hint.len());
    let mut last_dash = false;
    for c in hint.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 40 {
            break;
        }
    }
    slug.trim_end_matches('-').to_string()
}
