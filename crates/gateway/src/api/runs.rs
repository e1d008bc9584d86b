//! Run lifecycle and inspection endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::Value;

use loom_domain::error::Error;
use loom_store::{read_session_state, resolve_run_location, RunLocation, RunStore};

use crate::api::error::ApiError;
use crate::api::new_request_id;
use crate::projects::load_game_project;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /run/start
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Create a new run of the default game project and seed its store.
pub async fn start_run(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let project_id = state.config.game_projects.default_project.clone();

    let failed = |e: Error| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "RUN_START_FAILED",
            &request_id,
            e.to_string(),
        )
    };

    let project =
        load_game_project(&state.config.game_projects.root, &project_id).map_err(failed)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let _permit = state.run_locks.acquire(&run_id).await;
    RunStore::initialize(&state.config.game_projects.root, &project_id, &run_id)
        .map_err(failed)?;

    Ok(Json(serde_json::json!({
        "runId": run_id,
        "gameProject": project.manifest,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /run/:runId/state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Project the run's event log into the chat transcript and per-turn
/// debug entries.
pub async fn get_run_state(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let location = locate_run(&state, &run_id, &request_id)?;

    let _permit = state.run_locks.acquire(&run_id).await;
    let store = RunStore::open(
        &state.config.game_projects.root,
        &location.game_project_id,
        &run_id,
    )
    .map_err(|e| ApiError::from_domain(&request_id, &e))?;

    let session = read_session_state(&store)
        .map_err(|e| ApiError::from_domain(&request_id, &e))?;

    Ok(Json(serde_json::json!({
        "runId": run_id,
        "gameProjectId": location.game_project_id,
        "messages": session.messages,
        "debugEntries": session.debug_entries,
        "nextTurn": session.next_turn,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /run/:runId/turn/:turn/pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-turn pipeline audit: the execution row plus every pipeline
/// event in step order.
pub async fn get_turn_pipeline(
    State(state): State<AppState>,
    Path((run_id, turn)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let turn = parse_turn_index(&turn, &request_id)?;
    let location = locate_run(&state, &run_id, &request_id)?;

    let _permit = state.run_locks.acquire(&run_id).await;
    let store = RunStore::open(
        &state.config.game_projects.root,
        &location.game_project_id,
        &run_id,
    )
    .map_err(|e| ApiError::from_domain(&request_id, &e))?;

    let execution = store
        .get_turn_execution(turn)
        .map_err(|e| ApiError::from_domain(&request_id, &e))?;
    let events = store
        .list_pipeline_events(turn)
        .map_err(|e| ApiError::from_domain(&request_id, &e))?;

    Ok(Json(serde_json::json!({
        "runId": run_id,
        "turn": turn,
        "execution": execution,
        "events": events,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /run/:runId/open-saved-folder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the run's saved folder and ask the host OS to reveal it.
/// The reveal is best effort; the returned path is the contract.
pub async fn open_saved_folder(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let location = locate_run(&state, &run_id, &request_id)?;

    let opened_path = location.run_dir.display().to_string();
    reveal_folder(&location.run_dir);

    Ok(Json(serde_json::json!({
        "ok": true,
        "runId": run_id,
        "openedPath": opened_path,
    })))
}

fn reveal_folder(path: &std::path::Path) {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(target_os = "windows")]
    let opener = "explorer";
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let opener = "xdg-open";

    if let Err(e) = std::process::Command::new(opener).arg(path).spawn() {
        tracing::debug!(error = %e, path = %path.display(), "could not reveal saved folder");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scan the game-projects root for a run, or 404.
pub(crate) fn locate_run(
    state: &AppState,
    run_id: &str,
    request_id: &str,
) -> Result<RunLocation, ApiError> {
    resolve_run_location(&state.config.game_projects.root, run_id)
        .map_err(|e| ApiError::from_domain(request_id, &e))?
        .ok_or_else(|| {
            ApiError::from_domain(request_id, &Error::RunNotFound(run_id.to_owned()))
        })
}

/// Parse a turn index from a path segment: an integer ≥ 1.
pub(crate) fn parse_turn_index(raw: &str, request_id: &str) -> Result<u32, ApiError> {
    match raw.parse::<i64>() {
        Ok(turn) if turn >= 1 && turn <= u32::MAX as i64 => Ok(turn as u32),
        _ => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_TURN_INDEX",
            request_id,
            format!("turn must be an integer >= 1, got {raw:?}"),
        )),
    }
}
