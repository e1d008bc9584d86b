//! World-state diff operations: what a simulator proposes and what a
//! turn commits.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Summary line stamped onto every arbiter-selected commit.
pub const COMMIT_SUMMARY: &str = "Action resolved with router-managed module pipeline.";

/// Summary line stamped onto the synthetic refusal commit.
pub const REFUSAL_SUMMARY: &str = "Action refused before simulation.";

/// The five diff operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    UpsertFact,
    RemoveFact,
    UpsertEntity,
    Observation,
    Detection,
}

/// Visibility scope of an operation. `world` facts never leak into the
/// player view unless surfaced by an `observation`/`detection` in the
/// same committed diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpScope {
    #[serde(rename = "world")]
    World,
    #[serde(rename = "view:player")]
    ViewPlayer,
}

/// One diff operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiffOperation {
    pub op: OpKind,
    pub scope: OpScope,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub reason: String,
}

/// A simulator's (or arbiter-selected) proposed diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProposedDiff {
    pub module_name: String,
    pub operations: Vec<DiffOperation>,
}

/// The diff a completed turn commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedDiff {
    pub turn: u32,
    pub operations: Vec<DiffOperation>,
    pub summary: String,
}

/// Commit the arbiter-selected proposal for a turn.
pub fn commit(turn: u32, proposal: &ProposedDiff) -> CommittedDiff {
    CommittedDiff {
        turn,
        operations: proposal.operations.clone(),
        summary: COMMIT_SUMMARY.to_owned(),
    }
}

/// Synthesize the refusal commit: exactly one `view:player` observation
/// carrying the refusal reason as its text.
pub fn refusal_commit(turn: u32, reason: &str) -> CommittedDiff {
    let mut payload = Map::new();
    payload.insert("text".to_owned(), Value::String(reason.to_owned()));
    CommittedDiff {
        turn,
        operations: vec![DiffOperation {
            op: OpKind::Observation,
            scope: OpScope::ViewPlayer,
            payload,
            reason: "refused action".to_owned(),
        }],
        summary: REFUSAL_SUMMARY.to_owned(),
    }
}
