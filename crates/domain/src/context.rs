use serde::{Deserialize, Serialize};

/// Per-turn invocation context forwarded verbatim to every module
/// service as the `context` field of the request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub request_id: String,
    pub run_id: String,
    pub game_project_id: String,
    pub turn: u32,
    pub player_id: String,
    pub player_input: String,
}
