//! Turn execution endpoints — the primary interface for playing.
//!
//! - `POST /turn`            — run all eight stages and commit
//! - `POST /turn/step/start` — create a paused step-mode execution
//! - `POST /turn/step/next`  — execute exactly one stage

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use loom_store::RunStore;

use crate::api::error::ApiError;
use crate::api::new_request_id;
use crate::api::runs::locate_run;
use crate::projects::load_game_project;
use crate::runtime::{Pipeline, TurnFailure, TurnRequest};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnBody {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub turn: Option<i64>,
    #[serde(default)]
    pub player_input: Option<String>,
    #[serde(default)]
    pub player_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepNextBody {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub turn: Option<i64>,
}

/// Validated `POST /turn` / `POST /turn/step/start` payload.
struct ValidTurn {
    run_id: String,
    turn: u32,
    player_input: String,
    player_id: String,
}

fn bad_request(request_id: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(
        StatusCode::BAD_REQUEST,
        "BAD_TURN_REQUEST",
        request_id,
        message,
    )
}

fn validate_turn_index(turn: Option<i64>, request_id: &str) -> Result<u32, ApiError> {
    let turn = turn.ok_or_else(|| bad_request(request_id, "missing field: turn"))?;
    if turn < 1 || turn > i64::from(u32::MAX) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_TURN_INDEX",
            request_id,
            format!("turn must be >= 1, got {turn}"),
        ));
    }
    Ok(turn as u32)
}

fn validate_turn_body(
    body: Result<Json<TurnBody>, JsonRejection>,
    request_id: &str,
) -> Result<ValidTurn, ApiError> {
    let Json(body) = body.map_err(|e| bad_request(request_id, e.to_string()))?;

    let run_id = body
        .run_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request(request_id, "missing field: runId"))?;
    let player_input = body
        .player_input
        .ok_or_else(|| bad_request(request_id, "missing field: playerInput"))?;
    let player_id = body
        .player_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request(request_id, "missing field: playerId"))?;
    let turn = validate_turn_index(body.turn, request_id)?;

    Ok(ValidTurn {
        run_id,
        turn,
        player_input,
        player_id,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared turn plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Open the run's store and load its project bindings.
fn open_run(
    state: &AppState,
    run_id: &str,
    request_id: &str,
) -> Result<(RunStore, std::collections::HashMap<String, String>), ApiError> {
    let location = locate_run(state, run_id, request_id)?;
    let root = &state.config.game_projects.root;

    let store = RunStore::open(root, &location.game_project_id, run_id)
        .map_err(|e| ApiError::from_domain(request_id, &e))?;
    let project = load_game_project(root, &location.game_project_id)
        .map_err(|e| ApiError::from_domain(request_id, &e))?;

    Ok((store, project.module_bindings))
}

/// Enforce the turn-sequencing invariant: the submitted turn must be
/// exactly one past the highest snapshot.
fn check_turn_sequence(store: &RunStore, turn: u32, request_id: &str) -> Result<(), ApiError> {
    let expected = store
        .next_turn()
        .map_err(|e| ApiError::from_domain(request_id, &e))?;
    if turn != expected {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "TURN_SEQUENCE_CONFLICT",
            request_id,
            format!("expected turn {expected}, received {turn}"),
        )
        .with_details(serde_json::json!({
            "expectedTurn": expected,
            "receivedTurn": turn,
        })));
    }
    Ok(())
}

/// Map a pipeline failure, attaching the failing stage when known.
fn map_turn_failure(request_id: &str, failure: TurnFailure) -> ApiError {
    let mut api = ApiError::from_domain(request_id, &failure.error);
    if let Some(stage) = failure.stage {
        api = api.with_details(serde_json::json!({ "stage": stage.as_str() }));
    }
    api
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a complete turn through the eight-stage pipeline and return the
/// committed trace.
pub async fn process_turn(
    State(state): State<AppState>,
    body: Result<Json<TurnBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let valid = validate_turn_body(body, &request_id)?;

    let _permit = state.run_locks.acquire(&valid.run_id).await;
    let (store, bindings) = open_run(&state, &valid.run_id, &request_id)?;
    check_turn_sequence(&store, valid.turn, &request_id)?;

    let pipeline = Pipeline::new(&state.modules, &state.config.modules, &bindings, &store);
    let req = TurnRequest {
        turn: valid.turn,
        player_input: valid.player_input,
        player_id: valid.player_id,
        request_id: request_id.clone(),
    };

    let (_execution, trace) = pipeline
        .process_turn(&req)
        .await
        .map_err(|f| map_turn_failure(&request_id, f))?;

    Ok(Json(serde_json::json!({
        "runId": valid.run_id,
        "turn": valid.turn,
        "narrationText": trace.narration_text,
        "warnings": trace.warnings,
        "trace": trace,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /turn/step/start
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Create a paused step-mode execution at cursor 0.
pub async fn start_step(
    State(state): State<AppState>,
    body: Result<Json<TurnBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let valid = validate_turn_body(body, &request_id)?;

    let _permit = state.run_locks.acquire(&valid.run_id).await;
    let (store, bindings) = open_run(&state, &valid.run_id, &request_id)?;

    // At most one live execution per run: reject before sequencing so
    // the caller learns which turn is actually in flight.
    if let Some(active) = store
        .active_execution()
        .map_err(|e| ApiError::from_domain(&request_id, &e))?
    {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "STEP_EXECUTION_CONFLICT",
            &request_id,
            format!("turn {} is already executing", active.turn),
        )
        .with_details(serde_json::json!({ "activeTurn": active.turn })));
    }
    check_turn_sequence(&store, valid.turn, &request_id)?;

    let pipeline = Pipeline::new(&state.modules, &state.config.modules, &bindings, &store);
    let req = TurnRequest {
        turn: valid.turn,
        player_input: valid.player_input,
        player_id: valid.player_id,
        request_id: request_id.clone(),
    };

    let execution = pipeline
        .start_step_turn(&req)
        .map_err(|f| map_turn_failure(&request_id, f))?;
    let events = store
        .list_pipeline_events(valid.turn)
        .map_err(|e| ApiError::from_domain(&request_id, &e))?;

    Ok(Json(serde_json::json!({
        "runId": valid.run_id,
        "turn": valid.turn,
        "execution": execution,
        "pipelineEvents": events,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /turn/step/next
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute exactly one stage at the stored cursor. After completion,
/// further calls return the stored result without re-executing.
pub async fn step_next(
    State(state): State<AppState>,
    body: Result<Json<StepNextBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request_id = new_request_id();
    let Json(body) = body.map_err(|e| bad_request(&request_id, e.to_string()))?;
    let run_id = body
        .run_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request(&request_id, "missing field: runId"))?;
    let turn = validate_turn_index(body.turn, &request_id)?;

    let _permit = state.run_locks.acquire(&run_id).await;
    let (store, bindings) = open_run(&state, &run_id, &request_id)?;

    let execution = store
        .get_turn_execution(turn)
        .map_err(|e| ApiError::from_domain(&request_id, &e))?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                "STEP_EXECUTION_NOT_FOUND",
                &request_id,
                format!("no step execution for turn {turn}"),
            )
        })?;

    let pipeline = Pipeline::new(&state.modules, &state.config.modules, &bindings, &store);
    let (execution, _trace) = pipeline
        .advance_step(&execution)
        .await
        .map_err(|f| map_turn_failure(&request_id, f))?;
    let events = store
        .list_pipeline_events(turn)
        .map_err(|e| ApiError::from_domain(&request_id, &e))?;

    Ok(Json(serde_json::json!({
        "runId": run_id,
        "turn": turn,
        "result": execution.result,
        "execution": execution,
        "pipelineEvents": events,
    })))
}
