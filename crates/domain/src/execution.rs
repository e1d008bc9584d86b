//! Turn-execution rows: the only mutable state in the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;

/// How a turn is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// All eight stages run in a single call.
    Normal,
    /// One stage per `/turn/step/next` call.
    Step,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Step => "step",
        }
    }
}

/// The player-facing result stored when a turn completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_text: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// The running or completed state of one turn's pipeline.
///
/// Keyed by `(runId, turn)`. Created by turn start, mutated only by
/// the pipeline driver, terminal once `completed` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnExecution {
    pub run_id: String,
    pub turn: u32,
    pub mode: ExecutionMode,
    /// Index of the next stage to run, in `0..=8`.
    pub cursor: usize,
    pub completed: bool,
    pub player_input: String,
    pub player_id: String,
    pub request_id: String,
    pub game_project_id: String,
    pub checkpoint: Checkpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
