//! The fixed stage list and the per-stage audit records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{CommittedDiff, ProposedDiff};
use crate::modules::{
    ActionCandidates, ArbiterDecision, LoreRetrieval, LoremasterOutput, LoremasterPostOutput,
    ModuleRole,
};

/// Stage name of the synthetic pipeline event recorded when a turn is
/// accepted from the frontend, before the first module stage runs.
pub const FRONTEND_INPUT_STAGE: &str = "frontend_input";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The eight pipeline stages, in execution order.
///
/// The list is deliberately a fixed linear sequence with one refusal
/// gate, not a DAG; the invariants of the event log depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IntentExtractor,
    LoremasterRetrieve,
    LoremasterPre,
    DefaultSimulator,
    LoremasterPost,
    Arbiter,
    Proser,
    WorldStateUpdate,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 8] = [
        Stage::IntentExtractor,
        Stage::LoremasterRetrieve,
        Stage::LoremasterPre,
        Stage::DefaultSimulator,
        Stage::LoremasterPost,
        Stage::Arbiter,
        Stage::Proser,
        Stage::WorldStateUpdate,
    ];

    /// The stages skipped when a refusal reason is set.
    pub const SKIPPED_ON_REFUSAL: [Stage; 4] = [
        Stage::DefaultSimulator,
        Stage::LoremasterPost,
        Stage::Arbiter,
        Stage::Proser,
    ];

    /// Wire identifier used in pipeline events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentExtractor => "intent_extractor",
            Self::LoremasterRetrieve => "loremaster_retrieve",
            Self::LoremasterPre => "loremaster_pre",
            Self::DefaultSimulator => "default_simulator",
            Self::LoremasterPost => "loremaster_post",
            Self::Arbiter => "arbiter",
            Self::Proser => "proser",
            Self::WorldStateUpdate => "world_state_update",
        }
    }

    /// The module role this stage invokes. `world_state_update` is
    /// internal and invokes no module.
    pub fn module_role(&self) -> Option<ModuleRole> {
        match self {
            Self::IntentExtractor => Some(ModuleRole::IntentExtractor),
            Self::LoremasterRetrieve | Self::LoremasterPre | Self::LoremasterPost => {
                Some(ModuleRole::Loremaster)
            }
            Self::DefaultSimulator => Some(ModuleRole::DefaultSimulator),
            Self::Arbiter => Some(ModuleRole::Arbiter),
            Self::Proser => Some(ModuleRole::Proser),
            Self::WorldStateUpdate => None,
        }
    }

    /// Endpoint path on the role's base URL.
    pub fn endpoint_path(&self) -> Option<&'static str> {
        match self {
            Self::IntentExtractor
            | Self::DefaultSimulator
            | Self::Arbiter
            | Self::Proser => Some("/invoke"),
            Self::LoremasterRetrieve => Some("/retrieve"),
            Self::LoremasterPre => Some("/pre"),
            Self::LoremasterPost => Some("/post"),
            Self::WorldStateUpdate => None,
        }
    }

    /// Whether the refusal gate skips this stage.
    pub fn skipped_on_refusal(&self) -> bool {
        Self::SKIPPED_ON_REFUSAL.contains(self)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Error,
    Skipped,
}

/// Durable record of one pipeline step, in `stepNumber` order strictly
/// contiguous from 1 within `(runId, turn)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEventRecord {
    pub run_id: String,
    pub turn: u32,
    pub step_number: u32,
    pub stage: String,
    pub endpoint: String,
    pub status: StageStatus,
    pub request: Value,
    pub response: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn trace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The three loremaster touchpoints of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoremasterTrace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<LoreRetrieval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre: Option<LoremasterOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<LoremasterPostOutput>,
}

/// Refusal record within a turn trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefusalTrace {
    pub reason: String,
}

/// The complete audit payload persisted as a turn's `module_trace`
/// event. References every pipeline event of the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnTrace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<ActionCandidates>,
    #[serde(default)]
    pub loremaster: LoremasterTrace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<ProposedDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbiter: Option<ArbiterDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed: Option<CommittedDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<RefusalTrace>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_text: Option<String>,
    #[serde(default)]
    pub pipeline_events: Vec<PipelineEventRecord>,
    #[serde(default)]
    pub llm_conversations: BTreeMap<String, Value>,
}
