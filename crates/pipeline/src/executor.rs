//! Runs one generation job against the image provider.
//!
//! Shape of every job: validate, assemble inputs, call the provider,
//! persist outputs, report. Cancellation is checked before each step and
//! before each output download; while the provider call is in flight the
//! token is handed to the provider, which cancels the prediction remotely.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reelforge_core::continuity::ContinuitySource;
use reelforge_core::error::{CoreError, CoreResult};
use reelforge_core::generation::{
    GenerateImageInput, GenerateImageResult, GenerateShotInput, GenerateShotResult,
    GeneratedOutput, ImageMode, JobInput, JobResult, PromotionResult,
};
use reelforge_core::job_events::{
    JOB_PROGRESS, STEP_COLLECT_REFERENCES, STEP_DOWNLOAD_OUTPUT, STEP_LOAD_PROMPT,
    STEP_PROVIDER_CALL, STEP_RESOLVE_CONTINUITY,
};
use reelforge_core::project_layout;
use reelforge_core::references::{build_manifest, trim_for_outputs};
use reelforge_core::types::{FrameKind, JobId, Variation};
use reelforge_events::EventSink;
use reelforge_provider::download::write_atomic;
use reelforge_provider::{ImageProvider, PredictionOptions};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::continuity::ContinuityResolver;
use crate::references::{ContinuityFrame, ReferenceCollector, ReferenceRequest};
use crate::store::{read_optional, ProjectStore};

/// Return `CANCELED` if the token has fired.
pub fn checkpoint(cancel: &CancellationToken, step: &str) -> CoreResult<()> {
    if cancel.is_cancelled() {
        return Err(CoreError::Canceled(format!("canceled before {step}")));
    }
    Ok(())
}

/// Per-job context handed to [`GenerationExecutor::execute`].
pub struct JobContext<'a> {
    pub job_id: JobId,
    pub cancel: &'a CancellationToken,
    pub events: &'a dyn EventSink,
}

impl JobContext<'_> {
    fn step(&self, step: &str) -> CoreResult<()> {
        checkpoint(self.cancel, step)?;
        self.events.emit(JOB_PROGRESS, json!({ "step": step }));
        Ok(())
    }
}

pub struct GenerationExecutor {
    store: Arc<dyn ProjectStore>,
    provider: Arc<dyn ImageProvider>,
    resolver: ContinuityResolver,
    collector: ReferenceCollector,
}

impl GenerationExecutor {
    pub fn new(store: Arc<dyn ProjectStore>, provider: Arc<dyn ImageProvider>) -> Self {
        Self {
            resolver: ContinuityResolver::new(Arc::clone(&store)),
            collector: ReferenceCollector::new(Arc::clone(&store)),
            store,
            provider,
        }
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub fn resolver(&self) -> &ContinuityResolver {
        &self.resolver
    }

    pub async fn execute(&self, input: &JobInput, ctx: &JobContext<'_>) -> CoreResult<JobResult> {
        match input {
            JobInput::GenerateShot(shot) => self.generate_shot(shot, ctx).await.map(JobResult::GenerateShot),
            JobInput::GenerateImage(image) => {
                self.generate_image(image, ctx).await.map(JobResult::GenerateImage)
            }
        }
    }

    // -----------------------------------------------------------------------
    // generate-shot
    // -----------------------------------------------------------------------

    async fn generate_shot(
        &self,
        input: &GenerateShotInput,
        ctx: &JobContext<'_>,
    ) -> CoreResult<GenerateShotResult> {
        let started = Instant::now();
        let project_id = input.project_id.as_str();
        let shot_id = input.shot_id.as_str();
        let root = self.store.project_root(project_id).await?;

        ctx.step(STEP_LOAD_PROMPT)?;
        let prompt_rel = project_layout::compiled_prompt(shot_id, input.variation);
        let prompt = read_prompt(&root, &prompt_rel, "compiled prompt").await?;

        ctx.step(STEP_RESOLVE_CONTINUITY)?;
        let resolution = self
            .resolver
            .resolve_variation(project_id, shot_id, input.variation)
            .await?;
        let continuity = resolution.first;
        let continuity_frame = continuity
            .path
            .as_deref()
            .filter(|_| input.use_continuity && continuity.source != ContinuitySource::None)
            .map(|path| ContinuityFrame {
                path,
                // Manual overrides have no upstream; the frame is the shot's own.
                source_shot_id: continuity
                    .inherited_from
                    .as_ref()
                    .map_or(shot_id, |from| from.shot_id.as_str()),
            });
        let continuity_used = continuity_frame.is_some();

        ctx.step(STEP_COLLECT_REFERENCES)?;
        let shot = self.store.load_shot(project_id, shot_id).await?;
        let collected = self
            .collector
            .collect(&ReferenceRequest {
                project_id,
                shot_id,
                variation: input.variation,
                continuity_frame,
                auto_prepare: input.auto_prepare_references,
                shot: shot.as_ref(),
            })
            .await?;

        let output_count = usize::from(input.output_count);
        let trimmed = trim_for_outputs(collected.references, output_count);
        if trimmed.was_trimmed() {
            tracing::info!(
                job_id = %ctx.job_id,
                trimmed = trimmed.trimmed_count,
                "Trimmed references to fit provider limit",
            );
        }
        if input.require_reference && trimmed.kept.is_empty() {
            return Err(CoreError::ReferenceRequired {
                shot_id: shot_id.to_string(),
            });
        }
        let references = build_manifest(&trimmed.kept);

        ctx.step(STEP_PROVIDER_CALL)?;
        let options = PredictionOptions {
            aspect_ratio: input.aspect_ratio.clone(),
            output_count: u32::from(input.output_count),
            reference_images: trimmed.kept.into_iter().map(|r| r.data_uri).collect(),
        };
        let prediction = self
            .provider
            .create_prediction(&prompt, &options, ctx.cancel)
            .await?;

        let labels: &[FrameKind] = if output_count >= 2 && prediction.output.len() >= 2 {
            &[FrameKind::First, FrameKind::Last]
        } else {
            &[FrameKind::First]
        };

        let mut outputs = Vec::with_capacity(labels.len());
        for (&label, uri) in labels.iter().zip(&prediction.output) {
            ctx.step(STEP_DOWNLOAD_OUTPUT)?;
            let relative = if input.preview_only {
                project_layout::preview_frame(shot_id, input.variation, ctx.job_id, label)
            } else {
                project_layout::render_frame(shot_id, input.variation, label)
            };
            self.provider.download_image(uri, &root.join(&relative)).await?;
            outputs.push(GeneratedOutput {
                label,
                path: relative,
                uri: uri.clone(),
            });
        }
        if !input.preview_only {
            clear_unwritten_frames(&root, shot_id, input.variation, &outputs).await?;
        }

        Ok(GenerateShotResult {
            is_first_last_pair: outputs.len() == 2,
            outputs,
            preview_only: input.preview_only,
            continuity,
            continuity_used,
            references,
            reference_trimmed: trimmed.trimmed_count > 0,
            trimmed_reference_count: trimmed.trimmed_count,
            prediction_id: prediction.prediction_id,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    // -----------------------------------------------------------------------
    // generate-image
    // -----------------------------------------------------------------------

    async fn generate_image(
        &self,
        input: &GenerateImageInput,
        ctx: &JobContext<'_>,
    ) -> CoreResult<GenerateImageResult> {
        let started = Instant::now();
        let root = self.store.project_root(&input.project_id).await?;

        ctx.step(STEP_LOAD_PROMPT)?;
        let (prompt, relative) = match &input.mode {
            ImageMode::CharacterSlot { character_id, slot } => {
                let prompt_rel = project_layout::character_slot_prompt(character_id, slot);
                let prompt = read_prompt(&root, &prompt_rel, "slot prompt").await?;
                (prompt, project_layout::character_slot_image(character_id, slot))
            }
            ImageMode::Arbitrary {
                prompt,
                filename_hint,
            } => (prompt.clone(), scratch_output(ctx.job_id, filename_hint.as_deref())),
        };

        ctx.step(STEP_PROVIDER_CALL)?;
        let options = PredictionOptions {
            aspect_ratio: input.aspect_ratio.clone(),
            output_count: 1,
            reference_images: Vec::new(),
        };
        let prediction = self
            .provider
            .create_prediction(&prompt, &options, ctx.cancel)
            .await?;
        let uri = prediction.output.into_iter().next().ok_or_else(|| CoreError::Provider {
            status: None,
            message: format!("prediction {} returned no output", prediction.prediction_id),
        })?;

        ctx.step(STEP_DOWNLOAD_OUTPUT)?;
        self.provider.download_image(&uri, &root.join(&relative)).await?;

        Ok(GenerateImageResult {
            output_path: relative,
            uri,
            prediction_id: prediction.prediction_id,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    // -----------------------------------------------------------------------
    // Preview promotion
    // -----------------------------------------------------------------------

    /// Copy a preview job's outputs into the canonical frame slots.
    pub async fn promote_preview(
        &self,
        project_id: &str,
        shot_id: &str,
        variation: Variation,
        job_id: JobId,
        outputs: &[GeneratedOutput],
    ) -> CoreResult<PromotionResult> {
        let root = self.store.project_root(project_id).await?;
        let preview_dir = project_layout::preview_dir(shot_id, variation, job_id);

        let mut promoted = Vec::with_capacity(outputs.len());
        for output in outputs {
            if !output.path.starts_with(&preview_dir) {
                return Err(CoreError::Validation(format!(
                    "Output {} is not a preview of job {job_id}",
                    output.path.display()
                )));
            }
            let bytes = read_optional(&root.join(&output.path))
                .await?
                .ok_or_else(|| CoreError::not_found("preview output", output.path.display()))?;

            let canonical = project_layout::render_frame(shot_id, variation, output.label);
            write_atomic(&root.join(&canonical), &bytes).await?;
            promoted.push(GeneratedOutput {
                label: output.label,
                path: canonical,
                uri: output.uri.clone(),
            });
        }
        clear_unwritten_frames(&root, shot_id, variation, &promoted).await?;

        tracing::info!(
            job_id = %job_id,
            project_id,
            shot_id,
            variation = %variation,
            promoted = promoted.len(),
            "Preview promoted",
        );
        Ok(PromotionResult { job_id, promoted })
    }
}

/// Remove canonical frames of `shot_id/variation` that `written` did not
/// replace, so a single-output render never leaves an older `last` behind
/// for the next shot to inherit.
async fn clear_unwritten_frames(
    root: &Path,
    shot_id: &str,
    variation: Variation,
    written: &[GeneratedOutput],
) -> CoreResult<()> {
    let dir = root.join(project_layout::render_dir(shot_id, variation));
    for frame in [FrameKind::First, FrameKind::Last] {
        if written.iter().any(|o| o.label == frame) {
            continue;
        }
        for ext in project_layout::IMAGE_EXTENSIONS {
            match tokio::fs::remove_file(dir.join(format!("{frame}.{ext}"))).await {
                Ok(()) => tracing::debug!(shot_id, variation = %variation, %frame, ext, "Removed stale frame"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

async fn read_prompt(root: &Path, relative: &Path, what: &'static str) -> CoreResult<String> {
    let bytes = read_optional(&root.join(relative))
        .await?
        .ok_or_else(|| CoreError::not_found(what, relative.display()))?;
    let prompt = String::from_utf8_lossy(&bytes).trim().to_string();
    if prompt.is_empty() {
        return Err(CoreError::Validation(format!(
            "{what} {} is empty",
            relative.display()
        )));
    }
    Ok(prompt)
}

/// `scratch/generated/<timestamp>_<short-id>[_<slug>].png`.
fn scratch_output(job_id: JobId, filename_hint: Option<&str>) -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let short_id: String = job_id.simple().to_string().chars().take(8).collect();
    let slug = filename_hint.map(project_layout::slugify).unwrap_or_default();
    let name = if slug.is_empty() {
        format!("{timestamp}_{short_id}.{}", project_layout::OUTPUT_EXTENSION)
    } else {
        format!("{timestamp}_{short_id}_{slug}.{}", project_layout::OUTPUT_EXTENSION)
    };
    project_layout::scratch_dir().join(name)
}
