//! The pipeline driver — sequences the fixed stage list over one run's
//! store, carrying the checkpoint across stages and appending a
//! pipeline event per step.
//!
//! Entry points: [`Pipeline::process_turn`] (normal mode, all eight
//! stages in one call), [`Pipeline::start_step_turn`] /
//! [`Pipeline::advance_step`] (step mode, one stage per call).
//!
//! A module failure appends an `error` pipeline event and leaves the
//! execution row `Running` at the same cursor, so a later attempt can
//! resume (step mode) or replace the row (normal mode). Store failures
//! abort without partial commits.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Value};

use loom_domain::checkpoint::Checkpoint;
use loom_domain::config::ModulesConfig;
use loom_domain::context::RunContext;
use loom_domain::diff::refusal_commit;
use loom_domain::error::Error;
use loom_domain::execution::{ExecutionMode, ExecutionResult, TurnExecution};
use loom_domain::pipeline::{
    LoremasterTrace, PipelineEventRecord, RefusalTrace, Stage, StageStatus, TurnTrace,
    FRONTEND_INPUT_STAGE,
};
use loom_domain::trace::TraceEvent;
use loom_modules::ModuleClient;
use loom_store::store::{EVENT_COMMITTED_DIFF, EVENT_MODULE_TRACE, EVENT_PLAYER_INPUT};
use loom_store::RunStore;

use super::stages::{invoke_stage, prepare_stage, resolve_endpoint};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs & errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub turn: u32,
    pub player_input: String,
    pub player_id: String,
    pub request_id: String,
}

/// A pipeline failure, tagged with the stage that produced it when one
/// did.
#[derive(Debug)]
pub struct TurnFailure {
    pub stage: Option<Stage>,
    pub error: Error,
}

impl TurnFailure {
    fn at(stage: Stage, error: Error) -> Self {
        Self {
            stage: Some(stage),
            error,
        }
    }
}

impl From<Error> for TurnFailure {
    fn from(error: Error) -> Self {
        Self { stage: None, error }
    }
}

impl std::fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "stage {stage}: {}", self.error),
            None => self.error.fmt(f),
        }
    }
}

type TurnResult<T> = std::result::Result<T, TurnFailure>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One turn's worth of driving context: the module client, endpoint
/// configuration, the game project's module bindings, and the open
/// run store.
pub struct Pipeline<'a> {
    client: &'a ModuleClient,
    modules_config: &'a ModulesConfig,
    bindings: &'a HashMap<String, String>,
    store: &'a RunStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        client: &'a ModuleClient,
        modules_config: &'a ModulesConfig,
        bindings: &'a HashMap<String, String>,
        store: &'a RunStore,
    ) -> Self {
        Self {
            client,
            modules_config,
            bindings,
            store,
        }
    }

    // ── normal mode ──────────────────────────────────────────────────

    /// Run all eight stages for a turn in one call and finalize.
    pub async fn process_turn(
        &self,
        req: &TurnRequest,
    ) -> TurnResult<(TurnExecution, TurnTrace)> {
        // A leftover incomplete row for this turn index is an abandoned
        // attempt; replace it and replay from the first stage.
        if let Some(existing) = self.store.get_turn_execution(req.turn)? {
            if existing.completed {
                return Err(Error::ExecutionAlreadyExists { turn: req.turn }.into());
            }
            self.store.delete_turn_execution(req.turn)?;
        }

        let mut execution = self.begin_turn(req, ExecutionMode::Normal)?;
        let mut trace = None;

        while !execution.completed {
            if let Some(t) = self.run_stage_at(&execution, execution.cursor).await? {
                trace = Some(t);
            }
            execution = self.reload(req.turn)?;
        }

        let trace = trace.ok_or_else(|| {
            TurnFailure::from(Error::Other(
                "pipeline completed without producing a trace".to_owned(),
            ))
        })?;
        Ok((execution, trace))
    }

    // ── step mode ────────────────────────────────────────────────────

    /// Create a paused step-mode execution: the row at cursor 0 plus
    /// the `player_input` event and the `frontend_input` pipeline
    /// event. No stage runs yet.
    pub fn start_step_turn(&self, req: &TurnRequest) -> TurnResult<TurnExecution> {
        Ok(self.begin_turn(req, ExecutionMode::Step)?)
    }

    /// Execute exactly one stage at the stored cursor. Advancing a
    /// completed execution returns it unchanged (no re-execution).
    pub async fn advance_step(
        &self,
        execution: &TurnExecution,
    ) -> TurnResult<(TurnExecution, Option<TurnTrace>)> {
        if execution.completed {
            return Ok((execution.clone(), None));
        }
        let trace = self.run_stage_at(execution, execution.cursor).await?;
        let reloaded = self.reload(execution.turn)?;
        Ok((reloaded, trace))
    }

    // ── shared machinery ─────────────────────────────────────────────

    /// Create the execution row and record the turn's intake: the
    /// `player_input` event and the synthetic `frontend_input`
    /// pipeline event.
    fn begin_turn(
        &self,
        req: &TurnRequest,
        mode: ExecutionMode,
    ) -> Result<TurnExecution, TurnFailure> {
        let now = Utc::now();
        let execution = TurnExecution {
            run_id: self.store.run_id().to_owned(),
            turn: req.turn,
            mode,
            cursor: 0,
            completed: false,
            player_input: req.player_input.clone(),
            player_id: req.player_id.clone(),
            request_id: req.request_id.clone(),
            game_project_id: self.store.game_project_id().to_owned(),
            checkpoint: Checkpoint::default(),
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_turn_execution(&execution)?;

        self.store.append_event(
            req.turn,
            EVENT_PLAYER_INPUT,
            &json!({
                "text": req.player_input,
                "playerId": req.player_id,
                "requestId": req.request_id,
            }),
        )?;

        let started = Utc::now();
        self.append_pipeline_event(&PipelineEventRecord {
            run_id: execution.run_id.clone(),
            turn: req.turn,
            step_number: self.next_step(req.turn)?,
            stage: FRONTEND_INPUT_STAGE.to_owned(),
            endpoint: "frontend".to_owned(),
            status: StageStatus::Ok,
            request: json!({
                "playerInput": req.player_input,
                "playerId": req.player_id,
            }),
            response: json!({}),
            warnings: vec![],
            error: None,
            started_at: started,
            finished_at: Utc::now(),
        })?;

        TraceEvent::TurnStarted {
            run_id: execution.run_id.clone(),
            turn: req.turn,
            mode: mode.as_str().to_owned(),
        }
        .emit();

        Ok(execution)
    }

    /// Execute the stage at `index` against the execution's persisted
    /// checkpoint. Returns the turn trace when the stage was
    /// `world_state_update`.
    async fn run_stage_at(
        &self,
        execution: &TurnExecution,
        index: usize,
    ) -> TurnResult<Option<TurnTrace>> {
        let stage = *Stage::ALL.get(index).ok_or_else(|| {
            TurnFailure::from(Error::Other(format!("stage cursor {index} out of range")))
        })?;
        let ctx = run_context(execution);
        let mut checkpoint = execution.checkpoint.clone();

        if stage == Stage::WorldStateUpdate {
            let trace = self.finalize(execution, checkpoint).await?;
            return Ok(Some(trace));
        }

        let started = Utc::now();

        // Refusal gate: the four gated stages still occupy a pipeline
        // step, as skipped.
        if let Some(reason) = checkpoint.refusal_reason.clone() {
            if stage.skipped_on_refusal() {
                let finished = Utc::now();
                self.append_pipeline_event(&PipelineEventRecord {
                    run_id: execution.run_id.clone(),
                    turn: execution.turn,
                    step_number: self.next_step(execution.turn)?,
                    stage: stage.as_str().to_owned(),
                    endpoint: resolve_endpoint(stage, self.modules_config, self.bindings),
                    status: StageStatus::Skipped,
                    request: Value::Null,
                    response: json!({ "skipped": true, "reason": reason }),
                    warnings: vec![],
                    error: None,
                    started_at: started,
                    finished_at: finished,
                })?;
                self.store.update_execution_progress(
                    execution.turn,
                    index + 1,
                    &checkpoint,
                    false,
                    None,
                )?;
                self.emit_stage(execution, stage, "skipped", started);
                return Ok(None);
            }
        }

        let prepared = prepare_stage(
            stage,
            self.modules_config,
            self.bindings,
            self.store,
            &ctx,
            &checkpoint,
        )
        .map_err(|e| TurnFailure::at(stage, e))?;

        match invoke_stage(stage, &prepared, self.client, &ctx, &mut checkpoint).await {
            Ok(output) => {
                let finished = Utc::now();
                self.append_pipeline_event(&PipelineEventRecord {
                    run_id: execution.run_id.clone(),
                    turn: execution.turn,
                    step_number: self.next_step(execution.turn)?,
                    stage: stage.as_str().to_owned(),
                    endpoint: prepared.endpoint(),
                    status: StageStatus::Ok,
                    request: prepared.request.clone(),
                    response: output.response,
                    warnings: output.warnings,
                    error: None,
                    started_at: started,
                    finished_at: finished,
                })?;
                self.store.update_execution_progress(
                    execution.turn,
                    index + 1,
                    &checkpoint,
                    false,
                    None,
                )?;
                self.emit_stage(execution, stage, "ok", started);
                Ok(None)
            }
            Err(error) => {
                // The error event is durable even though the turn
                // fails; the cursor stays put for a later resume.
                let finished = Utc::now();
                self.append_pipeline_event(&PipelineEventRecord {
                    run_id: execution.run_id.clone(),
                    turn: execution.turn,
                    step_number: self.next_step(execution.turn)?,
                    stage: stage.as_str().to_owned(),
                    endpoint: prepared.endpoint(),
                    status: StageStatus::Error,
                    request: prepared.request.clone(),
                    response: Value::Null,
                    warnings: vec![],
                    error: Some(error.to_string()),
                    started_at: started,
                    finished_at: finished,
                })?;
                self.emit_stage(execution, stage, "error", started);
                Err(TurnFailure::at(stage, error))
            }
        }
    }

    /// `world_state_update`: synthesize the refusal commit when the
    /// gate fired, then persist trace, diff, and snapshot, and flip the
    /// execution to completed.
    async fn finalize(
        &self,
        execution: &TurnExecution,
        mut checkpoint: Checkpoint,
    ) -> TurnResult<TurnTrace> {
        let stage = Stage::WorldStateUpdate;
        let turn = execution.turn;
        let started = Utc::now();

        let refused = checkpoint.refusal_reason.is_some();
        if let Some(reason) = checkpoint.refusal_reason.clone() {
            checkpoint.committed = Some(refusal_commit(turn, &reason));
            checkpoint.narration_text = Some(reason);
        }
        let committed = checkpoint.committed.clone().ok_or_else(|| {
            TurnFailure::at(
                stage,
                Error::Other("world_state_update requires a committed diff".to_owned()),
            )
        })?;

        // The stage's own event is appended first so the trace's
        // pipeline-event list covers every step of the turn.
        self.append_pipeline_event(&PipelineEventRecord {
            run_id: execution.run_id.clone(),
            turn,
            step_number: self.next_step(turn)?,
            stage: stage.as_str().to_owned(),
            endpoint: "internal".to_owned(),
            status: StageStatus::Ok,
            request: json!({ "turn": turn }),
            response: json!({
                "committedOperations": committed.operations.len(),
                "refused": refused,
            }),
            warnings: vec![],
            error: None,
            started_at: started,
            finished_at: Utc::now(),
        })?;

        let pipeline_events = self
            .store
            .list_pipeline_events(turn)
            .map_err(|e| TurnFailure::at(stage, e))?;

        let trace = TurnTrace {
            intent: checkpoint.intent.clone(),
            loremaster: LoremasterTrace {
                retrieval: checkpoint.lore_retrieval.clone(),
                pre: checkpoint.loremaster_pre.clone(),
                post: checkpoint.lore_post.clone(),
            },
            proposal: checkpoint.proposal.clone(),
            arbiter: checkpoint.arbiter_decision.clone(),
            committed: Some(committed.clone()),
            refusal: checkpoint
                .refusal_reason
                .clone()
                .map(|reason| RefusalTrace { reason }),
            warnings: checkpoint.warnings.clone(),
            narration_text: checkpoint.narration_text.clone(),
            pipeline_events,
            llm_conversations: checkpoint.llm_conversations.clone(),
        };

        let wrap = |e: Error| TurnFailure::at(stage, e);

        self.store
            .append_event(turn, EVENT_MODULE_TRACE, &to_value(&trace).map_err(wrap)?)
            .map_err(wrap)?;
        self.store
            .append_event(turn, EVENT_COMMITTED_DIFF, &to_value(&committed).map_err(wrap)?)
            .map_err(wrap)?;
        self.store
            .append_snapshot(
                turn,
                &json!({ "lastSummary": committed.summary }),
                &json!({ "lastObservation": committed.operations }),
            )
            .map_err(wrap)?;

        let result = ExecutionResult {
            narration_text: checkpoint.narration_text.clone(),
            warnings: checkpoint.warnings.clone(),
        };
        self.store
            .update_execution_progress(turn, Stage::ALL.len(), &checkpoint, true, Some(&result))
            .map_err(wrap)?;

        TraceEvent::TurnCommitted {
            run_id: execution.run_id.to_owned(),
            turn,
            refused,
        }
        .emit();

        Ok(trace)
    }

    // ── helpers ──────────────────────────────────────────────────────

    fn reload(&self, turn: u32) -> Result<TurnExecution, TurnFailure> {
        self.store
            .get_turn_execution(turn)?
            .ok_or_else(|| Error::Store(format!("turn {turn} execution row vanished")).into())
    }

    fn next_step(&self, turn: u32) -> Result<u32, TurnFailure> {
        Ok(self.store.count_pipeline_events(turn)? + 1)
    }

    fn append_pipeline_event(&self, event: &PipelineEventRecord) -> Result<(), TurnFailure> {
        self.store.append_pipeline_event(event)?;
        Ok(())
    }

    fn emit_stage(
        &self,
        execution: &TurnExecution,
        stage: Stage,
        status: &str,
        started: chrono::DateTime<Utc>,
    ) {
        TraceEvent::StageFinished {
            run_id: execution.run_id.clone(),
            turn: execution.turn,
            stage: stage.as_str().to_owned(),
            status: status.to_owned(),
            duration_ms: (Utc::now() - started).num_milliseconds().max(0) as u64,
        }
        .emit();
    }
}

/// Build the module-facing context from the execution row.
pub fn run_context(execution: &TurnExecution) -> RunContext {
    RunContext {
        request_id: execution.request_id.clone(),
        run_id: execution.run_id.clone(),
        game_project_id: execution.game_project_id.clone(),
        turn: execution.turn,
        player_id: execution.player_id.clone(),
        player_input: execution.player_input.clone(),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(Error::from)
}
