//! Module-service roles and their wire contracts.
//!
//! Every module service answers with the uniform envelope
//! `{ meta, output, debug? }`. The `meta` and `output` shapes are
//! validated strictly (`deny_unknown_fields`); `debug` is opaque and
//! surfaced verbatim. Parsing is the contract: a module response that
//! does not match its role schema is an error, never coerced.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::diff::ProposedDiff;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The five module roles the router invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleRole {
    IntentExtractor,
    Loremaster,
    DefaultSimulator,
    Arbiter,
    Proser,
}

impl ModuleRole {
    /// Wire identifier, also used as the registry/manifest binding key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentExtractor => "intent_extractor",
            Self::Loremaster => "loremaster",
            Self::DefaultSimulator => "default_simulator",
            Self::Arbiter => "arbiter",
            Self::Proser => "proser",
        }
    }

    /// The environment variable that overrides this role's base URL.
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::IntentExtractor => "MODULE_INTENT_URL",
            Self::Loremaster => "MODULE_LOREMASTER_URL",
            Self::DefaultSimulator => "MODULE_DEFAULT_SIMULATOR_URL",
            Self::Arbiter => "MODULE_ARBITER_URL",
            Self::Proser => "MODULE_PROSER_URL",
        }
    }

    /// Fixed localhost default used when neither the manifest nor the
    /// environment provides a binding.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::IntentExtractor => "http://127.0.0.1:8101",
            Self::Loremaster => "http://127.0.0.1:8102",
            Self::DefaultSimulator => "http://127.0.0.1:8103",
            Self::Arbiter => "http://127.0.0.1:8104",
            Self::Proser => "http://127.0.0.1:8105",
        }
    }
}

impl std::fmt::Display for ModuleRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `meta` block every module response carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModuleMeta {
    pub module_name: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Optional `debug` block. The conversation trace is opaque to the
/// router and surfaced verbatim in the turn trace (modules record
/// their own retries and fallbacks here, e.g. `usedFallback`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDebug {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_conversation: Option<Value>,
}

/// The uniform module response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEnvelope<T> {
    pub meta: ModuleMeta,
    pub output: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<ModuleDebug>,
}

/// Marker for role output schemas, so the client can name the role in
/// schema errors without threading it separately.
pub trait ModuleOutput: DeserializeOwned {
    const ROLE: ModuleRole;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared vocabulary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consequence tags a candidate action or assessment may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsequenceTag {
    NeedsClarification,
    NoTargetInScope,
    PartialSuccessOnly,
    HighRiskExposure,
    ResourceCostApplies,
    SocialBacklash,
    NoiseGenerated,
}

/// Deserialize an optional string, folding `""` to `None`.
///
/// The wire format does not distinguish a module that omitted
/// `clarificationQuestion` from one that sent an empty string; the
/// router must treat both as absent.
fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// intent_extractor output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One interpretation of the raw player input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActionCandidate {
    pub actor_id: String,
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub consequence_tags: Vec<ConsequenceTag>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub clarification_question: Option<String>,
}

/// `intent_extractor` output: ranked candidate interpretations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActionCandidates {
    pub raw_input: String,
    pub candidates: Vec<ActionCandidate>,
}

impl ModuleOutput for ActionCandidates {
    const ROLE: ModuleRole = ModuleRole::IntentExtractor;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// loremaster outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single retrieved lore excerpt with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoreEvidence {
    pub source: String,
    pub excerpt: String,
    pub score: f64,
}

/// `loremaster /retrieve` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoreRetrieval {
    pub query: String,
    pub evidence: Vec<LoreEvidence>,
    pub summary: String,
}

impl ModuleOutput for LoreRetrieval {
    const ROLE: ModuleRole = ModuleRole::Loremaster;
}

/// Verdict on a candidate action's plausibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Allowed,
    AllowedWithConsequences,
    NeedsClarification,
}

/// Pre-check assessment of one candidate (by index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoreAssessment {
    pub candidate_index: usize,
    pub status: AssessmentStatus,
    #[serde(default)]
    pub consequence_tags: Vec<ConsequenceTag>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub clarification_question: Option<String>,
    pub rationale: String,
}

/// `loremaster /pre` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoremasterOutput {
    pub assessments: Vec<LoreAssessment>,
    pub summary: String,
}

impl ModuleOutput for LoremasterOutput {
    const ROLE: ModuleRole = ModuleRole::Loremaster;
}

/// Consistency verdict on a proposed diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Consistent,
    NeedsAdjustment,
}

/// `loremaster /post` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoremasterPostOutput {
    pub status: PostStatus,
    pub rationale: String,
    #[serde(default)]
    pub must_include: Vec<String>,
    #[serde(default)]
    pub must_avoid: Vec<String>,
}

impl ModuleOutput for LoremasterPostOutput {
    const ROLE: ModuleRole = ModuleRole::Loremaster;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// simulator / arbiter / proser outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ModuleOutput for ProposedDiff {
    const ROLE: ModuleRole = ModuleRole::DefaultSimulator;
}

/// Arbiter verdict on the proposed diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterVerdict {
    Accept,
    RequestRerun,
    ChooseAlternative,
}

/// `arbiter` output. Whatever the verdict, `selectedProposal` is the
/// diff the router commits; rerun negotiation is the arbiter's own
/// business and only reaches the router through the metadata fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArbiterDecision {
    pub decision: ArbiterVerdict,
    pub selected_proposal: ProposedDiff,
    pub rationale: String,
    #[serde(default)]
    pub rerun_hints: Vec<String>,
    #[serde(default)]
    pub selection_metadata: Map<String, Value>,
}

impl ModuleOutput for ArbiterDecision {
    const ROLE: ModuleRole = ModuleRole::Arbiter;
}

/// `proser` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProseOutput {
    pub narration_text: String,
}

impl ModuleOutput for ProseOutput {
    const ROLE: ModuleRole = ModuleRole::Proser;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_clarification_question_folds_to_none() {
        let json = r#"{
            "actorId": "entity.player.captain",
            "intent": "attack",
            "confidence": 0.9,
            "clarificationQuestion": ""
        }"#;
        let candidate: ActionCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.clarification_question, None);
    }

    #[test]
    fn present_clarification_question_survives() {
        let json = r#"{
            "actorId": "entity.player.captain",
            "intent": "attack",
            "confidence": 0.9,
            "clarificationQuestion": "Attack what?"
        }"#;
        let candidate: ActionCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.clarification_question.as_deref(), Some("Attack what?"));
    }

    #[test]
    fn unknown_output_field_is_rejected() {
        let json = r#"{
            "rawInput": "Look around.",
            "candidates": [],
            "extra": true
        }"#;
        let parsed: Result<ActionCandidates, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn consequence_tags_parse_snake_case() {
        let json = r#"["no_target_in_scope", "needs_clarification", "noise_generated"]"#;
        let tags: Vec<ConsequenceTag> = serde_json::from_str(json).unwrap();
        assert_eq!(
            tags,
            vec![
                ConsequenceTag::NoTargetInScope,
                ConsequenceTag::NeedsClarification,
                ConsequenceTag::NoiseGenerated,
            ]
        );
    }

    #[test]
    fn envelope_parses_with_and_without_debug() {
        let with_debug = r#"{
            "meta": { "moduleName": "proser", "warnings": ["slow"] },
            "output": { "narrationText": "Dust sweeps the deck." },
            "debug": { "llmConversation": { "usedFallback": true } }
        }"#;
        let envelope: ModuleEnvelope<ProseOutput> = serde_json::from_str(with_debug).unwrap();
        assert_eq!(envelope.meta.warnings, vec!["slow".to_string()]);
        assert!(envelope.debug.unwrap().llm_conversation.is_some());

        let without_debug = r#"{
            "meta": { "moduleName": "proser" },
            "output": { "narrationText": "Dust sweeps the deck." }
        }"#;
        let envelope: ModuleEnvelope<ProseOutput> = serde_json::from_str(without_debug).unwrap();
        assert!(envelope.debug.is_none());
    }
}
