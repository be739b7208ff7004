use axum::routing::get;
use axum::Router;

use crate::handlers::projects;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// GET    /{project_id}/shots/{shot_id}/continuity   -> shot_continuity
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{project_id}/shots/{shot_id}/continuity",
        get(projects::shot_continuity),
    )
}
