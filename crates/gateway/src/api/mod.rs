//! HTTP API surface.
//!
//! - `GET  /health`                                — liveness probe
//! - `GET  /game_projects/:id`                     — manifest JSON
//! - `GET  /game_projects/:id/sessions`            — saved runs
//! - `POST /run/start`                             — create a run
//! - `GET  /run/:runId/state`                      — projected session view
//! - `GET  /run/:runId/turn/:turn/pipeline`        — per-turn pipeline audit
//! - `POST /run/:runId/open-saved-folder`          — reveal the saved folder
//! - `POST /turn`                                  — run a full turn
//! - `POST /turn/step/start`, `POST /turn/step/next` — step-mode turns

pub mod error;
pub mod projects;
pub mod runs;
pub mod turns;

use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Game projects
        .route("/game_projects/:id", get(projects::get_game_project))
        .route(
            "/game_projects/:id/sessions",
            get(projects::list_game_sessions),
        )
        // Runs
        .route("/run/start", post(runs::start_run))
        .route("/run/:run_id/state", get(runs::get_run_state))
        .route(
            "/run/:run_id/turn/:turn/pipeline",
            get(runs::get_turn_pipeline),
        )
        .route(
            "/run/:run_id/open-saved-folder",
            post(runs::open_saved_folder),
        )
        // Turns
        .route("/turn", post(turns::process_turn))
        .route("/turn/step/start", post(turns::start_step))
        .route("/turn/step/next", post(turns::step_next))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Mint the request ID echoed in error envelopes and forwarded to
/// module services.
pub(crate) fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
