//! Per-stage executors.
//!
//! Each module stage is prepared (endpoint resolved, request built
//! from the checkpoint) and then invoked (typed call, checkpoint
//! updated with the role output). The split keeps the request payload
//! available for the pipeline event even when the call itself fails.
//!
//! `world_state_update` is internal and lives in the driver.

use std::collections::HashMap;

use serde_json::{json, Value};

use loom_domain::checkpoint::Checkpoint;
use loom_domain::config::ModulesConfig;
use loom_domain::context::RunContext;
use loom_domain::diff::{commit, ProposedDiff};
use loom_domain::error::{Error, Result};
use loom_domain::modules::{
    ActionCandidates, ArbiterDecision, LoreRetrieval, LoremasterOutput, LoremasterPostOutput,
    ModuleEnvelope, ModuleOutput, ModuleRole, ProseOutput,
};
use loom_domain::pipeline::Stage;
use loom_modules::{registry, ModuleClient};
use loom_store::RunStore;

use super::refusal::{refusal_from_intent, refusal_from_pre_check};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preparation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A stage ready to invoke: resolved endpoint plus the request body.
pub struct PreparedStage {
    pub role: ModuleRole,
    pub base_url: String,
    pub path: &'static str,
    pub request: Value,
}

impl PreparedStage {
    /// Full endpoint URL recorded in the pipeline event.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }
}

/// Resolve a module stage's endpoint without building a request (used
/// for skipped-stage events).
pub fn resolve_endpoint(
    stage: Stage,
    modules_config: &ModulesConfig,
    bindings: &HashMap<String, String>,
) -> String {
    match (stage.module_role(), stage.endpoint_path()) {
        (Some(role), Some(path)) => {
            let base = registry::resolve(
                role,
                bindings.get(role.as_str()).map(String::as_str),
                modules_config,
            );
            format!("{base}{path}")
        }
        _ => "internal".to_owned(),
    }
}

/// Build the request for a module stage from the current checkpoint.
pub fn prepare_stage(
    stage: Stage,
    modules_config: &ModulesConfig,
    bindings: &HashMap<String, String>,
    store: &RunStore,
    ctx: &RunContext,
    checkpoint: &Checkpoint,
) -> Result<PreparedStage> {
    let role = stage
        .module_role()
        .ok_or_else(|| Error::Other(format!("stage {stage} has no module role")))?;
    let path = stage
        .endpoint_path()
        .ok_or_else(|| Error::Other(format!("stage {stage} has no endpoint")))?;
    let base_url = registry::resolve(
        role,
        bindings.get(role.as_str()).map(String::as_str),
        modules_config,
    );

    let request = match stage {
        Stage::IntentExtractor => json!({ "context": ctx }),
        Stage::LoremasterRetrieve => {
            let intent = require(&checkpoint.intent, stage, "intent")?;
            // The retrieval stage is the only reader of the seeded
            // lore index; the module searches what we hand it.
            let lore_entries = store.lore_entries()?;
            json!({ "context": ctx, "intent": intent, "loreEntries": lore_entries })
        }
        Stage::LoremasterPre => {
            let intent = require(&checkpoint.intent, stage, "intent")?;
            let lore = require(&checkpoint.lore_retrieval, stage, "lore retrieval")?;
            json!({ "context": ctx, "intent": intent, "lore": lore })
        }
        Stage::DefaultSimulator => {
            let intent = require(&checkpoint.intent, stage, "intent")?;
            let lore = require(&checkpoint.lore_retrieval, stage, "lore retrieval")?;
            let pre = require(&checkpoint.loremaster_pre, stage, "pre-check")?;
            json!({ "context": ctx, "intent": intent, "lore": lore, "loremasterPre": pre })
        }
        Stage::LoremasterPost => {
            let intent = require(&checkpoint.intent, stage, "intent")?;
            let lore = require(&checkpoint.lore_retrieval, stage, "lore retrieval")?;
            let proposal = require(&checkpoint.proposal, stage, "proposal")?;
            json!({ "context": ctx, "intent": intent, "lore": lore, "proposal": proposal })
        }
        Stage::Arbiter => {
            let intent = require(&checkpoint.intent, stage, "intent")?;
            let lore = require(&checkpoint.lore_retrieval, stage, "lore retrieval")?;
            let pre = require(&checkpoint.loremaster_pre, stage, "pre-check")?;
            let proposal = require(&checkpoint.proposal, stage, "proposal")?;
            let post = require(&checkpoint.lore_post, stage, "post-check")?;
            json!({
                "context": ctx,
                "intent": intent,
                "lore": lore,
                "loremasterPre": pre,
                "proposal": proposal,
                "lorePost": post,
            })
        }
        Stage::Proser => {
            let committed = require(&checkpoint.committed, stage, "committed diff")?;
            let lore = require(&checkpoint.lore_retrieval, stage, "lore retrieval")?;
            let post = require(&checkpoint.lore_post, stage, "post-check")?;
            json!({ "context": ctx, "committed": committed, "lore": lore, "lorePost": post })
        }
        Stage::WorldStateUpdate => {
            return Err(Error::Other(
                "world_state_update is internal and is not prepared as a module stage".to_owned(),
            ))
        }
    };

    Ok(PreparedStage {
        role,
        base_url,
        path,
        request,
    })
}

fn require<'a, T>(field: &'a Option<T>, stage: Stage, what: &str) -> Result<&'a T> {
    field
        .as_ref()
        .ok_or_else(|| Error::Other(format!("stage {stage} requires the {what} output")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a successful stage invocation, destined for the pipeline
/// event.
pub struct StageOutput {
    pub response: Value,
    pub warnings: Vec<String>,
}

/// Invoke a prepared module stage and fold its output into the
/// checkpoint.
pub async fn invoke_stage(
    stage: Stage,
    prepared: &PreparedStage,
    client: &ModuleClient,
    ctx: &RunContext,
    checkpoint: &mut Checkpoint,
) -> Result<StageOutput> {
    match stage {
        Stage::IntentExtractor => {
            let envelope = call::<ActionCandidates>(client, prepared, ctx).await?;
            let output = absorb(checkpoint, &envelope);
            checkpoint.refusal_reason = refusal_from_intent(&envelope.output);
            checkpoint.intent = Some(envelope.output);
            Ok(output)
        }
        Stage::LoremasterRetrieve => {
            let envelope = call::<LoreRetrieval>(client, prepared, ctx).await?;
            let output = absorb(checkpoint, &envelope);
            checkpoint.lore_retrieval = Some(envelope.output);
            Ok(output)
        }
        Stage::LoremasterPre => {
            let envelope = call::<LoremasterOutput>(client, prepared, ctx).await?;
            let output = absorb(checkpoint, &envelope);
            // The pre-check overrides an intent-derived reason only
            // when it flags one itself.
            if let Some(reason) = refusal_from_pre_check(&envelope.output) {
                checkpoint.refusal_reason = Some(reason);
            }
            checkpoint.loremaster_pre = Some(envelope.output);
            Ok(output)
        }
        Stage::DefaultSimulator => {
            let envelope = call::<ProposedDiff>(client, prepared, ctx).await?;
            let output = absorb(checkpoint, &envelope);
            checkpoint.proposal = Some(envelope.output);
            Ok(output)
        }
        Stage::LoremasterPost => {
            let envelope = call::<LoremasterPostOutput>(client, prepared, ctx).await?;
            let output = absorb(checkpoint, &envelope);
            checkpoint.lore_post = Some(envelope.output);
            Ok(output)
        }
        Stage::Arbiter => {
            let envelope = call::<ArbiterDecision>(client, prepared, ctx).await?;
            let output = absorb(checkpoint, &envelope);
            let decision = envelope.output;
            checkpoint.proposal = Some(decision.selected_proposal.clone());
            checkpoint.committed = Some(commit(ctx.turn, &decision.selected_proposal));
            checkpoint.arbiter_decision = Some(decision);
            Ok(output)
        }
        Stage::Proser => {
            let envelope = call::<ProseOutput>(client, prepared, ctx).await?;
            let output = absorb(checkpoint, &envelope);
            checkpoint.narration_text = Some(envelope.output.narration_text);
            Ok(output)
        }
        Stage::WorldStateUpdate => Err(Error::Other(
            "world_state_update is internal and is not invoked as a module stage".to_owned(),
        )),
    }
}

async fn call<T: ModuleOutput>(
    client: &ModuleClient,
    prepared: &PreparedStage,
    ctx: &RunContext,
) -> Result<ModuleEnvelope<T>> {
    client
        .invoke::<T>(
            &prepared.base_url,
            prepared.path,
            &ctx.request_id,
            &prepared.request,
        )
        .await
}

/// Record the envelope on the checkpoint and produce the pipeline
/// event's response/warnings.
fn absorb<T: serde::Serialize + ModuleOutput>(
    checkpoint: &mut Checkpoint,
    envelope: &ModuleEnvelope<T>,
) -> StageOutput {
    checkpoint.absorb_meta(T::ROLE, &envelope.meta, envelope.debug.as_ref());
    StageOutput {
        response: serde_json::to_value(envelope).unwrap_or(Value::Null),
        warnings: envelope.meta.warnings.clone(),
    }
}
