//! Driver-level pipeline scenarios against stub module services.

mod support;

use loom_domain::config::ModulesConfig;
use loom_domain::diff::{OpKind, OpScope};
use loom_domain::pipeline::{StageStatus, FRONTEND_INPUT_STAGE};
use loom_gateway::runtime::{Pipeline, TurnRequest};
use loom_modules::ModuleClient;
use loom_store::store::{EVENT_COMMITTED_DIFF, EVENT_MODULE_TRACE, EVENT_PLAYER_INPUT};
use loom_store::RunStore;

use support::{project_root, spawn_stub, SimulatorMode, StubBehavior, PROJECT};

fn turn_request(turn: u32, player_input: &str) -> TurnRequest {
    TurnRequest {
        turn,
        player_input: player_input.to_owned(),
        player_id: "entity.player.captain".to_owned(),
        request_id: format!("req-test-{turn}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Happy path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_runs_all_stages_and_commits() {
    let stub = spawn_stub(StubBehavior::default()).await;
    let root = project_root(&stub);
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    let client = ModuleClient::new(2_000).unwrap();
    let modules_config = ModulesConfig::default();
    let bindings = stub.bindings();
    let pipeline = Pipeline::new(&client, &modules_config, &bindings, &store);

    let (execution, trace) = pipeline
        .process_turn(&turn_request(1, "Look around."))
        .await
        .unwrap();

    // Narration came from the proser.
    let narration = trace.narration_text.as_deref().unwrap();
    assert!(narration.contains("crawler"), "narration: {narration}");
    assert!(execution.completed);
    assert_eq!(execution.cursor, 8);
    assert_eq!(
        execution.result.unwrap().narration_text.as_deref(),
        Some(narration)
    );

    // Three event rows, in intake/trace/commit order.
    let events = store.list_events().unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![EVENT_PLAYER_INPUT, EVENT_MODULE_TRACE, EVENT_COMMITTED_DIFF]
    );

    // Nine pipeline events: frontend_input plus the eight stages, in
    // contiguous step order.
    let pipeline_events = store.list_pipeline_events(1).unwrap();
    assert_eq!(pipeline_events.len(), 9);
    for (i, event) in pipeline_events.iter().enumerate() {
        assert_eq!(event.step_number, i as u32 + 1);
        assert_eq!(event.status, StageStatus::Ok);
    }
    assert_eq!(pipeline_events[0].stage, FRONTEND_INPUT_STAGE);
    let step_of = |stage: &str| {
        pipeline_events
            .iter()
            .find(|e| e.stage == stage)
            .map(|e| e.step_number)
            .unwrap()
    };
    assert!(step_of("arbiter") < step_of("proser"));
    assert_eq!(step_of("world_state_update"), 9);

    // The trace references every pipeline event of the turn.
    assert_eq!(trace.pipeline_events.len(), pipeline_events.len());

    // Commit + snapshot advanced the turn counter.
    let committed = trace.committed.unwrap();
    assert_eq!(committed.turn, 1);
    assert_eq!(committed.operations.len(), 1);
    assert_eq!(committed.operations[0].scope, OpScope::ViewPlayer);
    assert_eq!(store.next_turn().unwrap(), 2);

    // Module conversation traces were surfaced verbatim.
    assert!(trace.llm_conversations.contains_key("proser"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Refusal path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn refused_attack_skips_the_gated_stages_but_still_commits() {
    let stub = spawn_stub(StubBehavior::refusing_attack()).await;
    let root = project_root(&stub);
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    let client = ModuleClient::new(2_000).unwrap();
    let modules_config = ModulesConfig::default();
    let bindings = stub.bindings();
    let pipeline = Pipeline::new(&client, &modules_config, &bindings, &store);

    let (execution, trace) = pipeline
        .process_turn(&turn_request(1, "Attack."))
        .await
        .unwrap();

    let narration = trace.narration_text.as_deref().unwrap();
    assert_eq!(
        narration,
        "Refused: no valid attack target is currently in scope."
    );
    assert!(execution.completed);

    // Refusal reached the trace.
    assert!(trace.refusal.unwrap().reason.starts_with("Refused:"));

    // Intent and both pre-refusal loremaster stages ran; the gated
    // four never saw a request.
    assert_eq!(stub.hits("/intent_extractor/invoke"), 1);
    assert_eq!(stub.hits("/loremaster/retrieve"), 1);
    assert_eq!(stub.hits("/loremaster/pre"), 1);
    assert_eq!(stub.hits("/default_simulator/invoke"), 0);
    assert_eq!(stub.hits("/loremaster/post"), 0);
    assert_eq!(stub.hits("/arbiter/invoke"), 0);
    assert_eq!(stub.hits("/proser/invoke"), 0);

    // The skipped stages still occupy pipeline steps.
    let pipeline_events = store.list_pipeline_events(1).unwrap();
    assert_eq!(pipeline_events.len(), 9);
    let skipped: Vec<&str> = pipeline_events
        .iter()
        .filter(|e| e.status == StageStatus::Skipped)
        .map(|e| e.stage.as_str())
        .collect();
    assert_eq!(
        skipped,
        vec!["default_simulator", "loremaster_post", "arbiter", "proser"]
    );

    // Exactly one player-scoped observation carrying the refusal text.
    let committed = trace.committed.unwrap();
    assert_eq!(committed.operations.len(), 1);
    let op = &committed.operations[0];
    assert_eq!(op.op, OpKind::Observation);
    assert_eq!(op.scope, OpScope::ViewPlayer);
    assert_eq!(
        op.payload.get("text").and_then(|v| v.as_str()),
        Some(narration)
    );

    // A refusal is a full commit: the turn counter advances.
    assert_eq!(store.next_turn().unwrap(), 2);
    assert_eq!(store.count_events(1, EVENT_MODULE_TRACE).unwrap(), 1);
    assert_eq!(store.count_events(1, EVENT_COMMITTED_DIFF).unwrap(), 1);
}

#[tokio::test]
async fn ambiguous_intent_is_refused_with_the_clarification_sentence() {
    let stub = spawn_stub(StubBehavior {
        intent_tags: vec!["needs_clarification"],
        intent_name: "open_door",
        simulator: SimulatorMode::Ok,
    })
    .await;
    let root = project_root(&stub);
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    let client = ModuleClient::new(2_000).unwrap();
    let modules_config = ModulesConfig::default();
    let bindings = stub.bindings();
    let pipeline = Pipeline::new(&client, &modules_config, &bindings, &store);

    let (_execution, trace) = pipeline
        .process_turn(&turn_request(1, "Open it."))
        .await
        .unwrap();

    assert_eq!(
        trace.narration_text.as_deref(),
        Some("Refused: action is ambiguous and cannot be safely resolved.")
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn step_mode_advances_one_stage_per_call() {
    let stub = spawn_stub(StubBehavior::default()).await;
    let root = project_root(&stub);
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    let client = ModuleClient::new(2_000).unwrap();
    let modules_config = ModulesConfig::default();
    let bindings = stub.bindings();
    let pipeline = Pipeline::new(&client, &modules_config, &bindings, &store);

    let execution = pipeline.start_step_turn(&turn_request(1, "Look around.")).unwrap();
    assert_eq!(execution.cursor, 0);
    assert!(!execution.completed);
    assert_eq!(store.list_pipeline_events(1).unwrap().len(), 1);

    let mut current = execution;
    for expected_cursor in 1..=8usize {
        let (advanced, _trace) = pipeline.advance_step(&current).await.unwrap();
        assert_eq!(advanced.cursor, expected_cursor);
        assert_eq!(advanced.completed, expected_cursor == 8);
        current = advanced;
    }

    let result = current.result.clone().unwrap();
    assert!(result.narration_text.unwrap().contains("crawler"));

    // Same three event rows as a normal-mode turn.
    let events = store.list_events().unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![EVENT_PLAYER_INPUT, EVENT_MODULE_TRACE, EVENT_COMMITTED_DIFF]
    );

    // Advancing past completion re-executes nothing.
    let before = stub.hits("/proser/invoke");
    let (after_completion, trace) = pipeline.advance_step(&current).await.unwrap();
    assert!(after_completion.completed);
    assert!(trace.is_none());
    assert_eq!(stub.hits("/proser/invoke"), before);
    assert_eq!(store.list_pipeline_events(1).unwrap().len(), 9);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Failure semantics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn module_failure_leaves_a_resumable_execution_and_no_commit() {
    let failing = spawn_stub(StubBehavior {
        simulator: SimulatorMode::Fail500,
        ..StubBehavior::default()
    })
    .await;
    let root = project_root(&failing);
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    let client = ModuleClient::new(2_000).unwrap();
    let modules_config = ModulesConfig::default();

    let failing_bindings = failing.bindings();
    let pipeline = Pipeline::new(&client, &modules_config, &failing_bindings, &store);
    let failure = pipeline
        .process_turn(&turn_request(1, "Look around."))
        .await
        .unwrap_err();
    assert_eq!(failure.stage.map(|s| s.as_str()), Some("default_simulator"));

    // The execution row is still running at the failed stage.
    let execution = store.get_turn_execution(1).unwrap().unwrap();
    assert!(!execution.completed);
    assert_eq!(execution.cursor, 3);

    // The failing stage's event is durable and marked as an error.
    let events = store.list_pipeline_events(1).unwrap();
    assert_eq!(events.len(), 5);
    let last = events.last().unwrap();
    assert_eq!(last.stage, "default_simulator");
    assert_eq!(last.status, StageStatus::Error);
    assert!(last.error.as_deref().unwrap().contains("500"));

    // Nothing was committed.
    assert_eq!(store.count_events(1, EVENT_MODULE_TRACE).unwrap(), 0);
    assert_eq!(store.count_events(1, EVENT_COMMITTED_DIFF).unwrap(), 0);
    assert_eq!(store.next_turn().unwrap(), 1);

    // A fresh attempt reuses the turn index, replaces the abandoned
    // row, and appends new pipeline events after the failed ones.
    let healthy = spawn_stub(StubBehavior::default()).await;
    let healthy_bindings = healthy.bindings();
    let retry = Pipeline::new(&client, &modules_config, &healthy_bindings, &store);
    let (execution, trace) = retry
        .process_turn(&turn_request(1, "Look around."))
        .await
        .unwrap();

    assert!(execution.completed);
    assert!(trace.narration_text.unwrap().contains("crawler"));
    assert_eq!(store.next_turn().unwrap(), 2);

    let events = store.list_pipeline_events(1).unwrap();
    assert_eq!(events.len(), 14);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.step_number, i as u32 + 1);
    }
}

#[tokio::test]
async fn module_timeout_fails_the_stage() {
    let stub = spawn_stub(StubBehavior {
        simulator: SimulatorMode::SlowMs(400),
        ..StubBehavior::default()
    })
    .await;
    let root = project_root(&stub);
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    // Client timeout far below the stub's delay.
    let client = ModuleClient::new(100).unwrap();
    let modules_config = ModulesConfig::default();
    let bindings = stub.bindings();
    let pipeline = Pipeline::new(&client, &modules_config, &bindings, &store);

    let failure = pipeline
        .process_turn(&turn_request(1, "Look around."))
        .await
        .unwrap_err();
    assert_eq!(failure.stage.map(|s| s.as_str()), Some("default_simulator"));
    assert!(matches!(failure.error, loom_domain::error::Error::Timeout(_)));

    let last = store.list_pipeline_events(1).unwrap().pop().unwrap();
    assert_eq!(last.status, StageStatus::Error);
    assert_eq!(store.count_events(1, EVENT_MODULE_TRACE).unwrap(), 0);
    assert_eq!(store.next_turn().unwrap(), 1);
}
