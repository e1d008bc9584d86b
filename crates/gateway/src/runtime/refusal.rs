//! The deterministic refusal predicate.
//!
//! Evaluated twice per turn: over the intent candidates, and again
//! over the loremaster pre-check. Once a refusal reason is set the
//! simulator, post-check, arbiter, and proser stages are skipped and
//! the turn commits a refusal observation instead.

use loom_domain::modules::{ActionCandidates, ConsequenceTag, LoremasterOutput};

/// Refusal sentence for an ambiguous action.
const AMBIGUOUS_REFUSAL: &str = "Refused: action is ambiguous and cannot be safely resolved.";

/// Refusal sentence for an attack with nothing to hit.
const NO_ATTACK_TARGET_REFUSAL: &str = "Refused: no valid attack target is currently in scope.";

/// Compute the refusal reason from the extracted intent, if any.
///
/// `no_target_in_scope` outranks `needs_clarification`: an action with
/// no target is refused as such even when the same candidate set also
/// asks for clarification.
pub fn refusal_from_intent(intent: &ActionCandidates) -> Option<String> {
    if let Some(candidate) = intent
        .candidates
        .iter()
        .find(|c| c.consequence_tags.contains(&ConsequenceTag::NoTargetInScope))
    {
        if candidate.intent == "attack" {
            return Some(NO_ATTACK_TARGET_REFUSAL.to_owned());
        }
        return Some(format!(
            "Refused: no valid target is in scope for {}.",
            candidate.intent.replace('_', " ")
        ));
    }

    if intent
        .candidates
        .iter()
        .any(|c| c.consequence_tags.contains(&ConsequenceTag::NeedsClarification))
    {
        return Some(AMBIGUOUS_REFUSAL.to_owned());
    }

    None
}

/// Compute the refusal reason from the pre-check, if any.
///
/// The first assessment bearing `no_target_in_scope` contributes its
/// rationale. A pre-check refusal overrides an intent-derived reason;
/// a clean pre-check leaves the earlier reason untouched (the caller
/// only assigns when this returns `Some`).
pub fn refusal_from_pre_check(pre: &LoremasterOutput) -> Option<String> {
    pre.assessments
        .iter()
        .find(|a| a.consequence_tags.contains(&ConsequenceTag::NoTargetInScope))
        .map(|a| format!("Refused: {}", a.rationale))
}
