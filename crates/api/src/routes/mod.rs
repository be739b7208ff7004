pub mod health;
pub mod jobs;
pub mod projects;
pub mod runs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                                        list, create
/// /jobs/{id}                                   get
/// /jobs/{id}/cancel | retry | promote          control (POST)
/// /jobs/{id}/events                            websocket stream
/// /jobs/{id}/history                           stored events
///
/// /runs                                        list, start
/// /runs/{id}                                   get
/// /runs/{id}/cancel | revert                   control (POST)
/// /runs/{id}/events                            websocket stream
///
/// /projects/{p}/shots/{s}/continuity           continuity for A-D
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/runs", runs::router())
        .nest("/projects", projects::router())
}
