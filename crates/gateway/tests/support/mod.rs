//! Shared test support: stub module services and throwaway game
//! projects.
//!
//! One axum listener plays every module role, mounted under
//! per-role prefixes so the registry's base-URL resolution is
//! exercised for real. Behavior is tweaked per test through
//! [`StubBehavior`]; request counts per path are observable through
//! the returned [`StubHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Behavior
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the stub simulator behaves.
#[derive(Debug, Clone, Copy)]
pub enum SimulatorMode {
    Ok,
    SlowMs(u64),
    Fail500,
}

/// Per-test stub configuration.
#[derive(Debug, Clone)]
pub struct StubBehavior {
    /// Consequence tags on the single intent candidate.
    pub intent_tags: Vec<&'static str>,
    /// Intent name of the single candidate.
    pub intent_name: &'static str,
    pub simulator: SimulatorMode,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            intent_tags: vec![],
            intent_name: "inspect_environment",
            simulator: SimulatorMode::Ok,
        }
    }
}

impl StubBehavior {
    /// The canonical refusal setup from the attack scenario.
    pub fn refusing_attack() -> Self {
        Self {
            intent_tags: vec!["no_target_in_scope"],
            intent_name: "attack",
            ..Self::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A running stub: its base URL, per-role bindings, and hit counters.
pub struct StubHandle {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, Arc<AtomicUsize>>>>,
}

impl StubHandle {
    /// Manifest-style bindings pointing every role at this stub.
    pub fn bindings(&self) -> HashMap<String, String> {
        [
            "intent_extractor",
            "loremaster",
            "default_simulator",
            "arbiter",
            "proser",
        ]
        .iter()
        .map(|role| ((*role).to_owned(), format!("{}/{role}", self.base_url)))
        .collect()
    }

    /// Requests observed on a path like `/default_simulator/invoke`.
    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .get(path)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }
}

#[derive(Clone)]
struct StubState {
    behavior: StubBehavior,
    hits: Arc<Mutex<HashMap<String, Arc<AtomicUsize>>>>,
}

impl StubState {
    fn count(&self, path: &str) {
        self.hits
            .lock()
            .entry(path.to_owned())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .fetch_add(1, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn envelope(module_name: &str, output: Value) -> Json<Value> {
    Json(json!({
        "meta": { "moduleName": module_name, "warnings": [] },
        "output": output,
        "debug": { "llmConversation": { "usedFallback": false } }
    }))
}

fn canonical_proposal() -> Value {
    json!({
        "moduleName": "default_simulator",
        "operations": [{
            "op": "observation",
            "scope": "view:player",
            "payload": { "text": "You scan the desert." },
            "reason": "player surveyed the surroundings"
        }]
    })
}

/// Spawn the all-roles stub on an ephemeral port.
pub async fn spawn_stub(behavior: StubBehavior) -> StubHandle {
    let state = StubState {
        behavior,
        hits: Arc::new(Mutex::new(HashMap::new())),
    };
    let hits = state.hits.clone();

    let router = Router::new()
        .route(
            "/intent_extractor/invoke",
            post(|State(s): State<StubState>, Json(body): Json<Value>| async move {
                s.count("/intent_extractor/invoke");
                let raw_input = body["context"]["playerInput"].as_str().unwrap_or("").to_owned();
                envelope(
                    "intent_extractor",
                    json!({
                        "rawInput": raw_input,
                        "candidates": [{
                            "actorId": "entity.player.captain",
                            "intent": s.behavior.intent_name,
                            "confidence": 0.93,
                            "params": {},
                            "consequenceTags": s.behavior.intent_tags,
                        }]
                    }),
                )
            }),
        )
        .route(
            "/loremaster/retrieve",
            post(|State(s): State<StubState>, Json(body): Json<Value>| async move {
                s.count("/loremaster/retrieve");
                // The router hands the seeded index to the module.
                let entries = body["loreEntries"].as_array().map_or(0, Vec::len);
                envelope(
                    "loremaster",
                    json!({
                        "query": "crawler surroundings",
                        "evidence": [{
                            "source": "world_context",
                            "excerpt": format!("Indexed {entries} lore entries."),
                            "score": 0.81
                        }],
                        "summary": "The crawler grinds across open desert."
                    }),
                )
            }),
        )
        .route(
            "/loremaster/pre",
            post(|State(s): State<StubState>| async move {
                s.count("/loremaster/pre");
                envelope(
                    "loremaster",
                    json!({
                        "assessments": [{
                            "candidateIndex": 0,
                            "status": "allowed",
                            "consequenceTags": [],
                            "rationale": "nothing in the lore forbids this"
                        }],
                        "summary": "plausible"
                    }),
                )
            }),
        )
        .route(
            "/default_simulator/invoke",
            post(|State(s): State<StubState>| async move {
                s.count("/default_simulator/invoke");
                match s.behavior.simulator {
                    SimulatorMode::Ok => {
                        envelope("default_simulator", canonical_proposal()).into_response()
                    }
                    SimulatorMode::SlowMs(ms) => {
                        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                        envelope("default_simulator", canonical_proposal()).into_response()
                    }
                    SimulatorMode::Fail500 => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "simulator crashed").into_response()
                    }
                }
            }),
        )
        .route(
            "/loremaster/post",
            post(|State(s): State<StubState>| async move {
                s.count("/loremaster/post");
                envelope(
                    "loremaster",
                    json!({
                        "status": "consistent",
                        "rationale": "observation matches the retrieved lore",
                        "mustInclude": [],
                        "mustAvoid": []
                    }),
                )
            }),
        )
        .route(
            "/arbiter/invoke",
            post(|State(s): State<StubState>, Json(body): Json<Value>| async move {
                s.count("/arbiter/invoke");
                let proposal = body["proposal"].clone();
                envelope(
                    "arbiter",
                    json!({
                        "decision": "accept",
                        "selectedProposal": proposal,
                        "rationale": "sole proposal is consistent",
                        "rerunHints": [],
                        "selectionMetadata": {}
                    }),
                )
            }),
        )
        .route(
            "/proser/invoke",
            post(|State(s): State<StubState>| async move {
                s.count("/proser/invoke");
                envelope(
                    "proser",
                    json!({
                        "narrationText":
                            "Dust sweeps across the crawler deck as you survey the dunes."
                    }),
                )
            }),
        )
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    StubHandle {
        base_url: format!("http://{addr}"),
        hits,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Game project fixture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const PROJECT: &str = "dune_crawler";

/// Create a throwaway game-projects root with one project whose
/// manifest binds every role to the stub.
pub fn project_root(stub: &StubHandle) -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let project_dir = root.path().join(PROJECT);
    let lore_dir = project_dir.join("lore");
    std::fs::create_dir_all(&lore_dir).unwrap();

    let manifest = json!({
        "id": PROJECT,
        "name": "Dune Crawler",
        "modules": stub.bindings(),
    });
    std::fs::write(project_dir.join("manifest.json"), manifest.to_string()).unwrap();
    std::fs::write(
        lore_dir.join("world.md"),
        "A colossal sand crawler grinds endlessly across the dunes.\n",
    )
    .unwrap();
    std::fs::write(
        lore_dir.join("default_lore_entries.csv"),
        "subject,description\n\
         entity.player.captain,Captain of the sand crawler.\n",
    )
    .unwrap();

    root
}
