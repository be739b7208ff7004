//! Handlers for the `/runs` resource (agent edit runs).

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use reelforge_core::types::RunId;
use reelforge_events::EventScope;
use reelforge_pipeline::{RunFilter, StartRun};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::parse_json_body;
use crate::response::DataResponse;
use crate::state::AppState;
use crate::ws::{stream_events, EventStream};

/// POST /api/v1/runs
///
/// Body: `{projectId, shotId, instruction?}`. Returns 201 with
/// `{runId, lockKey, status}`.
pub async fn start_run(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let request: StartRun = parse_json_body(&body, "run request")?;
    let started = state.runs.start_run(request)?;

    tracing::info!(run_id = %started.run_id, lock_key = %started.lock_key, "Run submitted");

    Ok((StatusCode::CREATED, Json(DataResponse::new(started))))
}

/// GET /api/v1/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Query(filter): Query<RunFilter>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse::new(state.runs.list_runs(&filter))))
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse::new(state.runs.get_run(run_id)?)))
}

/// POST /api/v1/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    state.runs.get_run(run_id)?;
    let canceled = state.runs.cancel_run(run_id);
    Ok(Json(DataResponse::new(json!({ "canceled": canceled }))))
}

/// POST /api/v1/runs/{id}/revert
///
/// Restore every file the run wrote. Reverting twice reports 0 the second
/// time. Also accepts runs from before a restart, via their manifest.
pub async fn revert_run(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> AppResult<impl IntoResponse> {
    let reverted = state.runs.revert_run(run_id).await?;
    Ok(Json(DataResponse::new(json!({ "runId": run_id, "revertedCount": reverted }))))
}

/// GET /api/v1/runs/{id}/events (websocket)
pub async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let (history, live, listener) = state.runs.subscribe_with_replay(run_id)?;
    let runs = state.runs.clone();
    let stream = EventStream {
        scope: EventScope::Run,
        id: run_id,
        history,
        live,
        on_close: Box::new(move || {
            if let Some(listener) = listener {
                runs.unsubscribe_run(run_id, listener);
            }
        }),
    };
    Ok(ws.on_upgrade(move |socket| stream_events(socket, stream)))
}
