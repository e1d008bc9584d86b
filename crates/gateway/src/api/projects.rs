//! Game-project API endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::Value;

use crate::api::error::ApiError;
use crate::api::new_request_id;
use crate::projects::load_game_project;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /game_projects/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Return a game project's manifest JSON verbatim.
pub async fn get_game_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let project = load_game_project(&state.config.game_projects.root, &id)
        .map_err(|e| ApiError::from_domain(&request_id, &e))?;
    Ok(Json(project.manifest))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /game_projects/:id/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// List a project's saved runs, newest first.
pub async fn list_game_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let sessions = loom_store::list_sessions(&state.config.game_projects.root, &id)
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SESSION_LIST_FAILED",
                &request_id,
                e.to_string(),
            )
        })?;

    Ok(Json(serde_json::json!({
        "gameProjectId": id,
        "sessions": sessions,
    })))
}
