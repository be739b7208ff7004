mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use reelforge_core::continuity::{ContinuityReason, ContinuitySource};
use reelforge_core::error::CoreError;
use reelforge_core::generation::{JobInput, JobResult};
use reelforge_core::job_events::{JOB_COMPLETED, JOB_QUEUED, JOB_STARTED};
use reelforge_core::references::ReferenceSourceType;
use reelforge_core::status::JobStatus;
use reelforge_core::types::{FrameKind, Variation};
use serde_json::json;

use common::*;

fn shot_result(job: &reelforge_pipeline::Job) -> &reelforge_core::generation::GenerateShotResult {
    match job.result.as_ref() {
        Some(JobResult::GenerateShot(result)) => result,
        other => panic!("expected a shot result, got {other:?}"),
    }
}

#[tokio::test]
async fn second_shot_inherits_last_frame_of_selected_variation() {
    let fx = Fixture::new();
    fx.write_sequence(json!({
        "editorialOrder": ["SHOT_01", "SHOT_02"],
        "selections": { "SHOT_01": "A" },
    }));
    fx.write("renders/SHOT_01/A/first.png", b"prev-first");
    fx.write("renders/SHOT_01/A/last.png", b"prev-last");
    fx.write_compiled_prompt("SHOT_02", Variation::A, "Hero steps onto the roof");

    let provider = Arc::new(FakeProvider::new());
    let manager = fx.job_manager(Arc::clone(&provider));

    let created = manager.create_job(shot_job("SHOT_02", Variation::A)).unwrap();
    assert_eq!(created.status, JobStatus::Queued);
    assert_eq!(created.lock_key.as_str(), "demo:SHOT_02:A");

    let job = wait_for_job(&manager, created.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let result = shot_result(&job);
    assert_eq!(result.continuity.source, ContinuitySource::Inherited);
    let from = result.continuity.inherited_from.as_ref().unwrap();
    assert_eq!(from.shot_id, "SHOT_01");
    assert_eq!(from.variation, Variation::A);
    assert_eq!(from.frame, FrameKind::Last);
    assert!(result.continuity_used);
    assert_eq!(result.references[0].source_type, ReferenceSourceType::Continuity);
    assert_eq!(result.references[0].source_id, "SHOT_01");
    assert_eq!(result.references[0].order, 1);

    assert_eq!(fx.read("renders/SHOT_02/A/first.png").unwrap(), b"first");
    assert!(!result.is_first_last_pair);

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].prompt, "Hero steps onto the roof");
    assert_eq!(calls[0].reference_count, 1);

    let events: Vec<String> = manager
        .job_events(created.job_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(events.first().map(String::as_str), Some(JOB_QUEUED));
    assert!(events.iter().any(|e| e == JOB_STARTED));
    assert_eq!(events.last().map(String::as_str), Some(JOB_COMPLETED));
}

#[tokio::test]
async fn continuity_can_be_switched_off_per_job() {
    let fx = Fixture::new();
    fx.write_sequence(json!({ "selections": { "SHOT_01": "A" } }));
    fx.write("renders/SHOT_01/A/last.png", b"prev-last");
    fx.write_compiled_prompt("SHOT_02", Variation::A, "prompt");

    let manager = fx.job_manager(Arc::new(FakeProvider::new()));
    let mut input = shot_input("SHOT_02", Variation::A);
    input.use_continuity = false;

    let created = manager.create_job(JobInput::GenerateShot(input)).unwrap();
    let job = wait_for_job(&manager, created.job_id).await;
    let result = shot_result(&job);

    assert_eq!(result.continuity.source, ContinuitySource::Inherited);
    assert!(!result.continuity_used);
    assert!(result.references.is_empty());
}

#[tokio::test]
async fn concurrent_job_on_same_key_conflicts_until_first_finishes() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_01", Variation::B, "prompt");

    let provider = Arc::new(FakeProvider::held());
    let manager = fx.job_manager(Arc::clone(&provider));

    let first = manager.create_job(shot_job("SHOT_01", Variation::B)).unwrap();
    provider.started.notified().await;

    let err = manager.create_job(shot_job("SHOT_01", Variation::B)).unwrap_err();
    assert_matches!(
        err,
        CoreError::LockConflict { ref active_id, .. } if *active_id == first.job_id.to_string()
    );

    // Another variation of the same shot is a different key.
    fx.write_compiled_prompt("SHOT_01", Variation::C, "prompt");
    let other = manager.create_job(shot_job("SHOT_01", Variation::C)).unwrap();

    provider.open();
    assert_eq!(wait_for_job(&manager, first.job_id).await.status, JobStatus::Completed);
    assert_eq!(wait_for_job(&manager, other.job_id).await.status, JobStatus::Completed);

    let third = manager.create_job(shot_job("SHOT_01", Variation::B)).unwrap();
    assert_eq!(wait_for_job(&manager, third.job_id).await.status, JobStatus::Completed);
    assert_eq!(manager.locks().active_count(), 0);
}

#[tokio::test]
async fn canceling_in_flight_job_frees_its_lock() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_01", Variation::A, "prompt");

    let provider = Arc::new(FakeProvider::held());
    let manager = fx.job_manager(Arc::clone(&provider));

    let created = manager.create_job(shot_job("SHOT_01", Variation::A)).unwrap();
    provider.started.notified().await;

    assert!(manager.cancel_job(created.job_id));
    let job = wait_for_job(&manager, created.job_id).await;

    assert_eq!(job.status, JobStatus::Canceled);
    assert_eq!(job.error.as_ref().unwrap().code, "CANCELED");
    assert!(job.result.is_none());
    assert_eq!(provider.cancellations(), 1);
    assert!(manager.locks().holder(&created.lock_key).is_none());
    assert!(fx.read("renders/SHOT_01/A/first.png").is_none());

    // Already terminal.
    assert!(!manager.cancel_job(created.job_id));
}

#[tokio::test]
async fn references_are_trimmed_to_leave_room_for_outputs() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_04", Variation::A, "prompt");
    for i in 1..=14 {
        fx.write(format!("references/SHOT_04/A/{i:02}.png"), format!("ref-{i}"));
    }

    let provider = Arc::new(FakeProvider::new());
    let manager = fx.job_manager(Arc::clone(&provider));
    let mut input = shot_input("SHOT_04", Variation::A);
    input.output_count = 2;

    let created = manager.create_job(JobInput::GenerateShot(input)).unwrap();
    let job = wait_for_job(&manager, created.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let result = shot_result(&job);
    assert!(result.reference_trimmed);
    assert_eq!(result.trimmed_reference_count, 1);
    assert_eq!(result.references.len(), 13);
    assert!(result.is_first_last_pair);
    assert_eq!(provider.calls()[0].reference_count, 13);

    assert_eq!(fx.read("renders/SHOT_04/A/first.png").unwrap(), b"first");
    assert_eq!(fx.read("renders/SHOT_04/A/last.png").unwrap(), b"last");
}

#[tokio::test]
async fn required_reference_fails_fast_without_calling_provider() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_01", Variation::A, "prompt");

    let provider = Arc::new(FakeProvider::new());
    let manager = fx.job_manager(Arc::clone(&provider));
    let mut input = shot_input("SHOT_01", Variation::A);
    input.require_reference = true;

    let created = manager.create_job(JobInput::GenerateShot(input)).unwrap();
    let job = wait_for_job(&manager, created.job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().code, "REFERENCE_REQUIRED");
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn missing_prompt_fails_the_job() {
    let fx = Fixture::new();
    let manager = fx.job_manager(Arc::new(FakeProvider::new()));

    let created = manager.create_job(shot_job("SHOT_09", Variation::A)).unwrap();
    let job = wait_for_job(&manager, created.job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().code, "NOT_FOUND");
    assert!(manager.locks().holder(&created.lock_key).is_none());
}

#[tokio::test]
async fn unconfigured_provider_rejects_admission() {
    let fx = Fixture::new();
    let manager = fx.job_manager(Arc::new(FakeProvider::unconfigured()));

    let err = manager.create_job(shot_job("SHOT_01", Variation::A)).unwrap_err();
    assert_matches!(err, CoreError::AuthRequired(_));
    assert!(manager.list_jobs(&Default::default()).is_empty());
    assert_eq!(manager.locks().active_count(), 0);
}

#[tokio::test]
async fn retry_creates_linked_job_with_overrides() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_01", Variation::A, "prompt");

    let provider = Arc::new(FakeProvider::new().failing(1));
    let manager = fx.job_manager(Arc::clone(&provider));

    let failed = manager.create_job(shot_job("SHOT_01", Variation::A)).unwrap();
    let job = wait_for_job(&manager, failed.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().code, "PROVIDER_ERROR");

    let retried = manager
        .retry_job(failed.job_id, &json!({ "outputCount": 2 }))
        .unwrap();
    assert_ne!(retried.job_id, failed.job_id);

    let job = wait_for_job(&manager, retried.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.retry_of, Some(failed.job_id));
    assert!(shot_result(&job).is_first_last_pair);
    assert_eq!(provider.calls()[1].output_count, 2);

    let listed = manager.list_jobs(&Default::default());
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, retried.job_id);
}

#[tokio::test]
async fn retry_of_running_job_conflicts() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_01", Variation::A, "prompt");

    let provider = Arc::new(FakeProvider::held());
    let manager = fx.job_manager(Arc::clone(&provider));
    let created = manager.create_job(shot_job("SHOT_01", Variation::A)).unwrap();
    provider.started.notified().await;

    let err = manager.retry_job(created.job_id, &json!({})).unwrap_err();
    assert_matches!(err, CoreError::Conflict(_));

    provider.open();
    wait_for_job(&manager, created.job_id).await;
}

#[tokio::test]
async fn preview_outputs_are_promoted_to_canonical_frames() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_05", Variation::D, "prompt");
    fx.write("renders/SHOT_05/D/first.png", b"old-first");

    let manager = fx.job_manager(Arc::new(FakeProvider::new()));
    let mut input = shot_input("SHOT_05", Variation::D);
    input.preview_only = true;
    input.output_count = 2;

    let created = manager.create_job(JobInput::GenerateShot(input)).unwrap();
    let job = wait_for_job(&manager, created.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let result = shot_result(&job);
    assert!(result.preview_only);
    for output in &result.outputs {
        assert!(output.path.starts_with("renders/SHOT_05/D/preview"));
    }
    assert_eq!(fx.read("renders/SHOT_05/D/first.png").unwrap(), b"old-first");

    let promoted = manager.promote_preview(created.job_id).await.unwrap();
    assert_eq!(promoted.promoted.len(), 2);
    assert_eq!(fx.read("renders/SHOT_05/D/first.png").unwrap(), b"first");
    assert_eq!(fx.read("renders/SHOT_05/D/last.png").unwrap(), b"last");
    assert!(manager.locks().holder(&created.lock_key).is_none());
}

#[tokio::test]
async fn canonical_job_cannot_be_promoted() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_01", Variation::A, "prompt");
    let manager = fx.job_manager(Arc::new(FakeProvider::new()));

    let created = manager.create_job(shot_job("SHOT_01", Variation::A)).unwrap();
    wait_for_job(&manager, created.job_id).await;

    let err = manager.promote_preview(created.job_id).await.unwrap_err();
    assert_matches!(err, CoreError::Validation(_));
}

#[tokio::test]
async fn replay_of_finished_job_returns_closed_receiver() {
    let fx = Fixture::new();
    fx.write_compiled_prompt("SHOT_01", Variation::A, "prompt");
    let manager = fx.job_manager(Arc::new(FakeProvider::new()));

    let created = manager.create_job(shot_job("SHOT_01", Variation::A)).unwrap();
    wait_for_job(&manager, created.job_id).await;

    let (history, mut rx, _subscription) = manager.subscribe_with_replay(created.job_id).unwrap();
    assert!(history.iter().any(|e| e.event == JOB_COMPLETED));
    let seqs: Vec<u64> = history.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn character_slot_image_is_written_into_refs() {
    let fx = Fixture::new();
    fx.write("characters/hero/refs/front.prompt.txt", "Hero, front view, neutral light");

    let provider = Arc::new(FakeProvider::new());
    let manager = fx.job_manager(Arc::clone(&provider));
    let input: JobInput = serde_json::from_value(json!({
        "type": "generate-image",
        "projectId": PROJECT,
        "mode": { "kind": "characterSlot", "characterId": "hero", "slot": "front" },
    }))
    .unwrap();

    let created = manager.create_job(input).unwrap();
    assert_eq!(created.lock_key.as_str(), "demo:character:hero:front");

    let job = wait_for_job(&manager, created.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_matches!(job.result, Some(JobResult::GenerateImage(_)));
    assert_eq!(fx.read("characters/hero/refs/front.png").unwrap(), b"first");
    assert_eq!(provider.calls()[0].prompt, "Hero, front view, neutral light");
    assert_eq!(provider.calls()[0].reference_count, 0);
}

#[tokio::test]
async fn single_output_render_drops_stale_last_frame() {
    let fx = Fixture::new();
    fx.write_sequence(json!({
        "editorialOrder": ["SHOT_01", "SHOT_02"],
        "selections": { "SHOT_01": "A" },
    }));
    fx.write("renders/SHOT_01/A/first.png", b"old-first");
    fx.write("renders/SHOT_01/A/last.png", b"old-last");
    fx.write("renders/SHOT_01/A/last.jpg", b"older-last");
    fx.write_compiled_prompt("SHOT_01", Variation::A, "prompt");
    fx.write_compiled_prompt("SHOT_02", Variation::A, "prompt");

    let manager = fx.job_manager(Arc::new(FakeProvider::new()));
    let created = manager.create_job(shot_job("SHOT_01", Variation::A)).unwrap();
    let job = wait_for_job(&manager, created.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert!(!shot_result(&job).is_first_last_pair);

    assert_eq!(fx.read("renders/SHOT_01/A/first.png").unwrap(), b"first");
    assert!(fx.read("renders/SHOT_01/A/last.png").is_none());
    assert!(fx.read("renders/SHOT_01/A/last.jpg").is_none());

    // The next shot no longer inherits the outdated frame.
    let created = manager.create_job(shot_job("SHOT_02", Variation::A)).unwrap();
    let job = wait_for_job(&manager, created.job_id).await;
    let result = shot_result(&job);
    assert_eq!(result.continuity.source, ContinuitySource::None);
    assert_eq!(result.continuity.reason, ContinuityReason::MissingPreviousLast);
    assert!(!result.continuity_used);
}
