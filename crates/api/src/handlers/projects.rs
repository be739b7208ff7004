//! Read-only project views.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/projects/{project_id}/shots/{shot_id}/continuity
///
/// First/last frame resolution for variations A through D, as a job for
/// each variation would see it right now.
pub async fn shot_continuity(
    State(state): State<AppState>,
    Path((project_id, shot_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let resolutions = state.continuity.resolve_shot(&project_id, &shot_id).await?;
    Ok(Json(DataResponse::new(resolutions)))
}
