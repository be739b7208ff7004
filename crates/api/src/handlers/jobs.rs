//! Handlers for the `/jobs` resource.

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use reelforge_core::generation::JobInput;
use reelforge_core::types::JobId;
use reelforge_events::EventScope;
use reelforge_pipeline::JobFilter;
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::parse_json_body;
use crate::response::DataResponse;
use crate::state::AppState;
use crate::ws::{stream_events, EventStream};

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Admit a generation job. Returns 201 with `{jobId, lockKey, status}`;
/// validation, auth and lock failures return before anything is created.
pub async fn create_job(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let input: JobInput = parse_json_body(&body, "job input")?;
    let created = state.jobs.create_job(input)?;

    tracing::info!(
        job_id = %created.job_id,
        lock_key = %created.lock_key,
        "Job submitted",
    );

    Ok((StatusCode::CREATED, Json(DataResponse::new(created))))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first. Optional `status`, `jobType`, `projectId` and `limit`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse::new(state.jobs.list_jobs(&filter))))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse::new(state.jobs.get_job(job_id)?)))
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// `{canceled: false}` for jobs that already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    // Unknown ids are a 404, not `canceled: false`.
    state.jobs.get_job(job_id)?;
    let canceled = state.jobs.cancel_job(job_id);
    Ok(Json(DataResponse::new(json!({ "canceled": canceled }))))
}

/// POST /api/v1/jobs/{id}/retry
///
/// Optional body: input overrides deep-merged over the source job's input.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let overrides: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        parse_json_body(&body, "retry overrides")?
    };
    let created = state.jobs.retry_job(job_id, &overrides)?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(created))))
}

/// POST /api/v1/jobs/{id}/promote
pub async fn promote_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let promoted = state.jobs.promote_preview(job_id).await?;
    Ok(Json(DataResponse::new(promoted)))
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/events (websocket)
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let (history, live, subscription) = state.jobs.subscribe_with_replay(job_id)?;
    let jobs = state.jobs.clone();
    let stream = EventStream {
        scope: EventScope::Job,
        id: job_id,
        history,
        live,
        on_close: Box::new(move || {
            jobs.unsubscribe(subscription);
        }),
    };
    Ok(ws.on_upgrade(move |socket| stream_events(socket, stream)))
}

/// GET /api/v1/jobs/{id}/history
///
/// The same records as the websocket replay, as plain JSON.
pub async fn job_history(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse::new(state.jobs.job_events(job_id)?)))
}
