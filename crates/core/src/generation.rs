//! Generation job inputs, boundary validation, and result shapes.
//!
//! [`JobInput`] is the tagged union every generation request deserializes
//! into. [`JobInput::validate`] must pass before a job is admitted; the
//! executor assumes validated input.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::continuity::FirstFrameResolution;
use crate::error::{CoreError, CoreResult};
use crate::lock_key::LockKey;
use crate::project_layout::validate_segment;
use crate::references::ReferenceManifestEntry;
use crate::types::{FrameKind, JobId, Variation};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Outputs requested from the provider when the caller does not say.
pub const DEFAULT_OUTPUT_COUNT: u8 = 2;

/// Maximum outputs a shot generation may request (first + last).
pub const MAX_OUTPUT_COUNT: u8 = 2;

/// Maximum length of a free-form prompt.
pub const MAX_PROMPT_CHARS: usize = 10_000;

fn default_true() -> bool {
    true
}

fn default_output_count() -> u8 {
    DEFAULT_OUTPUT_COUNT
}

// ---------------------------------------------------------------------------
// Job type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    GenerateShot,
    GenerateImage,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateShot => "generate-shot",
            Self::GenerateImage => "generate-image",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate-shot" => Ok(Self::GenerateShot),
            "generate-image" => Ok(Self::GenerateImage),
            other => Err(CoreError::Validation(format!(
                "Unknown job type '{other}'. Must be one of: generate-shot, generate-image"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Input of a generation job, keyed by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobInput {
    GenerateShot(GenerateShotInput),
    GenerateImage(GenerateImageInput),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateShotInput {
    #[validate(length(min = 1, max = 128))]
    pub project_id: String,
    #[validate(length(min = 1, max = 128))]
    pub shot_id: String,
    pub variation: Variation,
    #[serde(default = "default_true")]
    pub use_continuity: bool,
    #[serde(default)]
    pub require_reference: bool,
    #[serde(default)]
    pub preview_only: bool,
    #[validate(range(min = 1, max = 2))]
    #[serde(default = "default_output_count")]
    pub output_count: u8,
    #[serde(default = "default_true")]
    pub auto_prepare_references: bool,
    #[validate(length(min = 1, max = 16))]
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageInput {
    #[validate(length(min = 1, max = 128))]
    pub project_id: String,
    pub mode: ImageMode,
    #[validate(length(min = 1, max = 16))]
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

/// Where a `generate-image` job reads its prompt and writes its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ImageMode {
    /// Prompt file and output both live in the character's `refs/` folder.
    CharacterSlot { character_id: String, slot: String },
    /// Free-form prompt written into the scratch output folder.
    Arbitrary {
        prompt: String,
        #[serde(default)]
        filename_hint: Option<String>,
    },
}

fn validation_error(errors: validator::ValidationErrors) -> CoreError {
    CoreError::Validation(errors.to_string())
}

impl JobInput {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::GenerateShot(_) => JobType::GenerateShot,
            Self::GenerateImage(_) => JobType::GenerateImage,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Self::GenerateShot(input) => &input.project_id,
            Self::GenerateImage(input) => &input.project_id,
        }
    }

    /// Validate field ranges and that every id is a safe path segment.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Self::GenerateShot(input) => {
                input.validate().map_err(validation_error)?;
                validate_segment("projectId", &input.project_id)?;
                validate_segment("shotId", &input.shot_id)?;
            }
            Self::GenerateImage(input) => {
                input.validate().map_err(validation_error)?;
                validate_segment("projectId", &input.project_id)?;
                match &input.mode {
                    ImageMode::CharacterSlot { character_id, slot } => {
                        validate_segment("characterId", character_id)?;
                        validate_segment("slot", slot)?;
                    }
                    ImageMode::Arbitrary { prompt, .. } => {
                        if prompt.trim().is_empty() {
                            return Err(CoreError::Validation(
                                "prompt must not be empty".into(),
                            ));
                        }
                        if prompt.chars().count() > MAX_PROMPT_CHARS {
                            return Err(CoreError::Validation(format!(
                                "prompt exceeds {MAX_PROMPT_CHARS} characters"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Lock key guarding the resource this job writes.
    pub fn lock_key(&self, job_id: JobId) -> LockKey {
        match self {
            Self::GenerateShot(input) => {
                LockKey::for_shot(&input.project_id, &input.shot_id, input.variation)
            }
            Self::GenerateImage(input) => match &input.mode {
                ImageMode::CharacterSlot { character_id, slot } => {
                    LockKey::for_character_slot(&input.project_id, character_id, slot)
                }
                ImageMode::Arbitrary { .. } => LockKey::for_scratch(&input.project_id, job_id),
            },
        }
    }

    /// Apply retry overrides: a JSON object deep-merged over this input.
    ///
    /// The job type may not change. The merged input is re-validated.
    pub fn with_overrides(&self, overrides: &serde_json::Value) -> CoreResult<Self> {
        if overrides.is_null() {
            return Ok(self.clone());
        }
        if !overrides.is_object() {
            return Err(CoreError::Validation(
                "Retry overrides must be a JSON object".into(),
            ));
        }
        if let Some(t) = overrides.get("type") {
            if t.as_str() != Some(self.job_type().as_str()) {
                return Err(CoreError::Validation(
                    "Retry overrides cannot change the job type".into(),
                ));
            }
        }

        let mut merged = serde_json::to_value(self)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize job input: {e}")))?;
        merge_json(&mut merged, overrides);

        let input: JobInput = serde_json::from_value(merged)
            .map_err(|e| CoreError::Validation(format!("Invalid retry overrides: {e}")))?;
        input.validate()?;
        Ok(input)
    }
}

/// Recursive object merge; non-object values in `patch` replace `base`.
fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(base.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One image written by a generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedOutput {
    pub label: FrameKind,
    pub path: PathBuf,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateShotResult {
    pub outputs: Vec<GeneratedOutput>,
    pub is_first_last_pair: bool,
    pub preview_only: bool,
    /// First-frame resolution, reported whether or not it was used.
    pub continuity: FirstFrameResolution,
    pub continuity_used: bool,
    pub references: Vec<ReferenceManifestEntry>,
    pub reference_trimmed: bool,
    pub trimmed_reference_count: usize,
    pub prediction_id: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResult {
    pub output_path: PathBuf,
    pub uri: String,
    pub prediction_id: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobResult {
    GenerateShot(GenerateShotResult),
    GenerateImage(GenerateImageResult),
}

/// Outcome of promoting a preview job's outputs into canonical slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionResult {
    pub job_id: JobId,
    pub promoted: Vec<GeneratedOutput>,
}
