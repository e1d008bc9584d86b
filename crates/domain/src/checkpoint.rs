//! The cross-stage accumulator for one turn.
//!
//! A `Checkpoint` is built up stage by stage and serialized into the
//! turn-execution row after every stage, so a paused or interrupted
//! turn can resume from its cursor with the exact state the next stage
//! expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{CommittedDiff, ProposedDiff};
use crate::modules::{
    ActionCandidates, ArbiterDecision, LoreRetrieval, LoremasterOutput, LoremasterPostOutput,
    ModuleDebug, ModuleMeta, ModuleRole,
};

/// Stage outputs accumulated across one turn.
///
/// Conversation traces are keyed by role in a `BTreeMap` so the
/// serialized form is key-stable: a checkpoint written to the store and
/// read back compares equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<ActionCandidates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lore_retrieval: Option<LoreRetrieval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loremaster_pre: Option<LoremasterOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<ProposedDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lore_post: Option<LoremasterPostOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed: Option<CommittedDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbiter_decision: Option<ArbiterDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration_text: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub llm_conversations: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<String>,
}

impl Checkpoint {
    /// Fold a module's envelope metadata into the checkpoint: warnings
    /// are appended verbatim, conversation traces are stored under the
    /// role key (the last stage of a role wins).
    pub fn absorb_meta(&mut self, role: ModuleRole, meta: &ModuleMeta, debug: Option<&ModuleDebug>) {
        self.warnings.extend(meta.warnings.iter().cloned());
        if let Some(conversation) = debug.and_then(|d| d.llm_conversation.clone()) {
            self.llm_conversations.insert(role.as_str().to_owned(), conversation);
        }
    }
}
