//! RunStore integration tests over a throwaway game-projects root.

use chrono::Utc;
use serde_json::json;

use loom_domain::checkpoint::Checkpoint;
use loom_domain::error::Error;
use loom_domain::execution::{ExecutionMode, ExecutionResult, TurnExecution};
use loom_domain::pipeline::{PipelineEventRecord, StageStatus};
use loom_store::store::{EVENT_COMMITTED_DIFF, EVENT_MODULE_TRACE, EVENT_PLAYER_INPUT};
use loom_store::{read_session_state, RunStore};

const PROJECT: &str = "dune_crawler";

fn project_root_with_lore() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let lore_dir = root.path().join(PROJECT).join("lore");
    std::fs::create_dir_all(&lore_dir).unwrap();
    std::fs::write(
        lore_dir.join("world.md"),
        "The crawler never stops moving across the dunes.\n",
    )
    .unwrap();
    std::fs::write(
        lore_dir.join("default_lore_entries.csv"),
        "subject,description\n\
         entity.player.captain,Captain of the sand crawler.\n\
         anchor.deck,The crawler's open upper deck.\n",
    )
    .unwrap();
    root
}

fn sample_pipeline_event(run_id: &str, turn: u32, step: u32, stage: &str) -> PipelineEventRecord {
    PipelineEventRecord {
        run_id: run_id.to_owned(),
        turn,
        step_number: step,
        stage: stage.to_owned(),
        endpoint: "POST /invoke".to_owned(),
        status: StageStatus::Ok,
        request: json!({ "context": { "turn": turn } }),
        response: json!({ "ok": true }),
        warnings: vec![],
        error: None,
        started_at: Utc::now(),
        finished_at: Utc::now(),
    }
}

fn sample_execution(run_id: &str, turn: u32) -> TurnExecution {
    let now = Utc::now();
    TurnExecution {
        run_id: run_id.to_owned(),
        turn,
        mode: ExecutionMode::Normal,
        cursor: 0,
        completed: false,
        player_input: "Look around.".to_owned(),
        player_id: "entity.player.captain".to_owned(),
        request_id: "req-1".to_owned(),
        game_project_id: PROJECT.to_owned(),
        checkpoint: Checkpoint::default(),
        result: None,
        created_at: now,
        updated_at: now,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Initialization & seeding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn initialize_seeds_snapshot_and_lore() {
    let root = project_root_with_lore();
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    assert_eq!(store.max_snapshot_turn().unwrap(), Some(0));
    assert_eq!(store.next_turn().unwrap(), 1);

    let lore = store.lore_entries().unwrap();
    let subjects: Vec<&str> = lore.iter().map(|e| e.subject.as_str()).collect();
    assert!(subjects.contains(&"world_context"));
    assert!(subjects.contains(&"entity.player.captain"));
    assert!(subjects.contains(&"anchor.deck"));

    let world = lore.iter().find(|e| e.subject == "world_context").unwrap();
    assert_eq!(world.source, "lore/world.md");
    assert!(world.data.contains("never stops moving"));
}

#[test]
fn initialize_is_idempotent() {
    let root = project_root_with_lore();
    let first = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();
    let lore_before = first.lore_entries().unwrap().len();
    drop(first);

    let second = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();
    assert_eq!(second.max_snapshot_turn().unwrap(), Some(0));
    assert_eq!(second.lore_entries().unwrap().len(), lore_before);

    // Still exactly one seed snapshot.
    second
        .append_snapshot(1, &json!({ "lastSummary": "s" }), &json!({}))
        .unwrap();
    assert_eq!(second.next_turn().unwrap(), 2);
}

#[test]
fn open_missing_run_is_run_not_found() {
    let root = project_root_with_lore();
    let err = RunStore::open(root.path(), PROJECT, "no-such-run").unwrap_err();
    assert!(matches!(err, Error::RunNotFound(_)));
}

#[test]
fn seeding_without_lore_files_yields_empty_index() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("bare")).unwrap();
    let store = RunStore::initialize(root.path(), "bare", "run-1").unwrap();
    assert!(store.lore_entries().unwrap().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline event contiguity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn pipeline_steps_must_be_contiguous_from_one() {
    let root = project_root_with_lore();
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    store
        .append_pipeline_event(&sample_pipeline_event("run-1", 1, 1, "frontend_input"))
        .unwrap();
    store
        .append_pipeline_event(&sample_pipeline_event("run-1", 1, 2, "intent_extractor"))
        .unwrap();

    // A gap is rejected.
    let err = store
        .append_pipeline_event(&sample_pipeline_event("run-1", 1, 4, "loremaster_pre"))
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    // A duplicate step is rejected too.
    let err = store
        .append_pipeline_event(&sample_pipeline_event("run-1", 1, 2, "loremaster_retrieve"))
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    // Turns count independently.
    store
        .append_pipeline_event(&sample_pipeline_event("run-1", 2, 1, "frontend_input"))
        .unwrap();

    let events = store.list_pipeline_events(1).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].step_number, 1);
    assert_eq!(events[1].stage, "intent_extractor");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn executions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn duplicate_execution_is_a_typed_conflict() {
    let root = project_root_with_lore();
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    store.create_turn_execution(&sample_execution("run-1", 1)).unwrap();
    let err = store
        .create_turn_execution(&sample_execution("run-1", 1))
        .unwrap_err();
    assert!(matches!(err, Error::ExecutionAlreadyExists { turn: 1 }));
}

#[test]
fn active_execution_surfaces_only_incomplete_rows() {
    let root = project_root_with_lore();
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    assert!(store.active_execution().unwrap().is_none());

    store.create_turn_execution(&sample_execution("run-1", 1)).unwrap();
    assert_eq!(store.active_execution().unwrap().unwrap().turn, 1);

    store
        .update_execution_progress(
            1,
            8,
            &Checkpoint::default(),
            true,
            Some(&ExecutionResult {
                narration_text: Some("done".into()),
                warnings: vec![],
            }),
        )
        .unwrap();
    assert!(store.active_execution().unwrap().is_none());

    let completed = store.get_turn_execution(1).unwrap().unwrap();
    assert!(completed.completed);
    assert_eq!(
        completed.result.unwrap().narration_text.as_deref(),
        Some("done")
    );
}

#[test]
fn cursor_never_moves_backwards_and_completion_is_terminal() {
    let root = project_root_with_lore();
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();
    store.create_turn_execution(&sample_execution("run-1", 1)).unwrap();

    store
        .update_execution_progress(1, 3, &Checkpoint::default(), false, None)
        .unwrap();
    let err = store
        .update_execution_progress(1, 2, &Checkpoint::default(), false, None)
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));

    store
        .update_execution_progress(1, 8, &Checkpoint::default(), true, None)
        .unwrap();
    let err = store
        .update_execution_progress(1, 8, &Checkpoint::default(), false, None)
        .unwrap_err();
    assert!(matches!(err, Error::Store(_)));
}

#[test]
fn checkpoint_roundtrips_through_the_execution_row() {
    let root = project_root_with_lore();
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();
    store.create_turn_execution(&sample_execution("run-1", 1)).unwrap();

    let mut checkpoint = Checkpoint::default();
    checkpoint.refusal_reason =
        Some("Refused: action is ambiguous and cannot be safely resolved.".to_owned());
    checkpoint.warnings.push("low confidence".to_owned());
    checkpoint
        .llm_conversations
        .insert("intent_extractor".into(), json!({ "usedFallback": true }));

    store
        .update_execution_progress(1, 2, &checkpoint, false, None)
        .unwrap();

    let restored = store.read_execution_checkpoint(1).unwrap().unwrap();
    assert_eq!(restored, checkpoint);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn projection_folds_events_into_transcript_and_debug() {
    let root = project_root_with_lore();
    let store = RunStore::initialize(root.path(), PROJECT, "run-1").unwrap();

    store
        .append_event(
            1,
            EVENT_PLAYER_INPUT,
            &json!({ "text": "Look around.", "playerId": "entity.player.captain" }),
        )
        .unwrap();
    store
        .append_event(
            1,
            EVENT_MODULE_TRACE,
            &json!({ "narrationText": "Dust sweeps across the crawler deck.", "warnings": [] }),
        )
        .unwrap();
    store
        .append_event(1, EVENT_COMMITTED_DIFF, &json!({ "turn": 1, "operations": [] }))
        .unwrap();
    store
        .append_snapshot(1, &json!({ "lastSummary": "s" }), &json!({}))
        .unwrap();

    let state = read_session_state(&store).unwrap();
    assert_eq!(state.next_turn, 2);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].text, "Look around.");
    assert_eq!(
        state.messages[1].text,
        "Dust sweeps across the crawler deck."
    );
    assert_eq!(state.debug_entries.len(), 1);
    assert_eq!(state.debug_entries[0].turn, 1);

    // Projection is a pure read: a second fold yields the same view.
    let again = read_session_state(&store).unwrap();
    assert_eq!(again.messages.len(), state.messages.len());
    assert_eq!(again.next_turn, state.next_turn);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Discovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[test]
fn discovery_scans_saved_folders() {
    let root = project_root_with_lore();
    RunStore::initialize(root.path(), PROJECT, "run-a").unwrap();
    RunStore::initialize(root.path(), PROJECT, "run-b").unwrap();

    let sessions = loom_store::list_sessions(root.path(), PROJECT).unwrap();
    let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(sessions.len(), 2);
    assert!(ids.contains(&"run-a"));
    assert!(ids.contains(&"run-b"));

    let location = loom_store::resolve_run_location(root.path(), "run-b")
        .unwrap()
        .unwrap();
    assert_eq!(location.game_project_id, PROJECT);
    assert!(location.run_dir.ends_with("saved/run-b"));

    assert!(loom_store::resolve_run_location(root.path(), "run-zzz")
        .unwrap()
        .is_none());

    // An unknown project simply lists nothing.
    assert!(loom_store::list_sessions(root.path(), "ghost")
        .unwrap()
        .is_empty());
}
