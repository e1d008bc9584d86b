use serde::Serialize;

/// Structured trace events emitted across all StoryLoom crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RunInitialized {
        run_id: String,
        game_project_id: String,
        lore_entries: usize,
    },
    StoreOpened {
        run_id: String,
        path: String,
    },
    TurnStarted {
        run_id: String,
        turn: u32,
        mode: String,
    },
    StageFinished {
        run_id: String,
        turn: u32,
        stage: String,
        status: String,
        duration_ms: u64,
    },
    TurnCommitted {
        run_id: String,
        turn: u32,
        refused: bool,
    },
    ModuleCall {
        role: String,
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "loom_event");
    }
}
