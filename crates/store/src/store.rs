//! The per-run store handle.
//!
//! One `RunStore` per `runId`, backed by a single SQLite file under
//! `<gameProjectsRoot>/<gameProjectId>/saved/<runId>/world_state.db`.
//! The folder is authoritative: run discovery is a directory scan, and
//! deleting the folder deletes the run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use loom_domain::checkpoint::Checkpoint;
use loom_domain::error::{Error, Result};
use loom_domain::execution::{ExecutionMode, ExecutionResult, TurnExecution};
use loom_domain::pipeline::PipelineEventRecord;
use loom_domain::trace::TraceEvent;

use crate::schema::init_schema;
use crate::seed::seed_lore;
use crate::store_err;

/// File name of the per-run database.
pub const DB_FILE: &str = "world_state.db";

/// Directory under a game project holding its runs.
pub const SAVED_DIR: &str = "saved";

/// Event types recorded in the append-only `events` table.
pub const EVENT_PLAYER_INPUT: &str = "player_input";
pub const EVENT_MODULE_TRACE: &str = "module_trace";
pub const EVENT_COMMITTED_DIFF: &str = "committed_diff";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One row of the `events` table.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub turn: u32,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// One row of the `lore` table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoreEntry {
    pub subject: String,
    pub data: String,
    pub source: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RunStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A write-serialized handle to one run's database.
///
/// Opened per request and dropped before the response; SQLite's file
/// locking (plus the gateway's per-run lock) keeps writers exclusive.
#[derive(Debug)]
pub struct RunStore {
    conn: Connection,
    run_id: String,
    game_project_id: String,
    db_path: PathBuf,
}

impl RunStore {
    /// Create and seed a new run. Idempotent on an already-initialized
    /// folder: schema, seed snapshot, and lore rows all no-op when
    /// present.
    pub fn initialize(
        projects_root: &Path,
        game_project_id: &str,
        run_id: &str,
    ) -> Result<Self> {
        let project_dir = projects_root.join(game_project_id);
        let run_dir = project_dir.join(SAVED_DIR).join(run_id);
        std::fs::create_dir_all(&run_dir)?;

        let store = Self::open_at(&project_dir, game_project_id, run_id)?;
        store.ensure_seed_snapshot()?;
        let lore_entries = seed_lore(&store.conn, &project_dir)?;

        TraceEvent::RunInitialized {
            run_id: run_id.to_owned(),
            game_project_id: game_project_id.to_owned(),
            lore_entries,
        }
        .emit();

        Ok(store)
    }

    /// Open an existing run. Fails with `RunNotFound` when the folder
    /// has no database file.
    pub fn open(projects_root: &Path, game_project_id: &str, run_id: &str) -> Result<Self> {
        let project_dir = projects_root.join(game_project_id);
        let db_path = project_dir.join(SAVED_DIR).join(run_id).join(DB_FILE);
        if !db_path.exists() {
            return Err(Error::RunNotFound(run_id.to_owned()));
        }
        Self::open_at(&project_dir, game_project_id, run_id)
    }

    fn open_at(project_dir: &Path, game_project_id: &str, run_id: &str) -> Result<Self> {
        let db_path = project_dir.join(SAVED_DIR).join(run_id).join(DB_FILE);
        let conn = Connection::open(&db_path).map_err(store_err)?;
        init_schema(&conn)?;

        let store = Self {
            conn,
            run_id: run_id.to_owned(),
            game_project_id: game_project_id.to_owned(),
            db_path: db_path.clone(),
        };
        store.put_meta("run_id", run_id)?;
        store.put_meta("game_project_id", game_project_id)?;

        TraceEvent::StoreOpened {
            run_id: run_id.to_owned(),
            path: db_path.display().to_string(),
        }
        .emit();

        Ok(store)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn game_project_id(&self) -> &str {
        &self.game_project_id
    }

    /// Path of the run's database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// The run's saved folder (parent of the database file).
    pub fn run_dir(&self) -> &Path {
        self.db_path.parent().unwrap_or(Path::new("."))
    }

    // ── meta ─────────────────────────────────────────────────────────

    fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(store_err)?;
        Ok(())
    }

    // ── snapshots ────────────────────────────────────────────────────

    /// Insert the turn-0 seed snapshot unless one exists.
    fn ensure_seed_snapshot(&self) -> Result<()> {
        let existing: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM snapshots WHERE turn = 0",
                [],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        if existing > 0 {
            return Ok(());
        }

        let world_state = serde_json::json!({
            "gameProjectId": self.game_project_id,
            "entities": [],
            "facts": [],
            "anchors": [],
        });
        let view_state = serde_json::json!({ "player": { "observations": [] } });
        self.append_snapshot(0, &world_state, &view_state)
    }

    /// Append a snapshot row for a committed turn.
    pub fn append_snapshot(&self, turn: u32, world_state: &Value, view_state: &Value) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO snapshots (turn, world_state, view_state, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    turn,
                    world_state.to_string(),
                    view_state.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Highest snapshot turn, if any snapshot exists.
    pub fn max_snapshot_turn(&self) -> Result<Option<u32>> {
        self.conn
            .query_row("SELECT MAX(turn) FROM snapshots", [], |row| row.get(0))
            .map_err(store_err)
    }

    /// The turn index the next player input must carry.
    pub fn next_turn(&self) -> Result<u32> {
        Ok(self.max_snapshot_turn()?.map_or(1, |t| t + 1))
    }

    // ── events ───────────────────────────────────────────────────────

    /// Append-only insert into `events`.
    pub fn append_event(&self, turn: u32, event_type: &str, payload: &Value) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO events (turn, event_type, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![turn, event_type, payload.to_string(), Utc::now().to_rfc3339()],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// All events ordered by `(turn, id)`.
    pub fn list_events(&self) -> Result<Vec<EventRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, turn, event_type, payload, created_at
                 FROM events ORDER BY turn ASC, id ASC",
            )
            .map_err(store_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;

        rows.into_iter()
            .map(|(id, turn, event_type, payload, created_at)| {
                Ok(EventRow {
                    id,
                    turn,
                    event_type,
                    payload: serde_json::from_str(&payload)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    /// Count events of one type for one turn (used by tests and the
    /// commit-on-completion invariant checks).
    pub fn count_events(&self, turn: u32, event_type: &str) -> Result<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE turn = ?1 AND event_type = ?2",
                params![turn, event_type],
                |row| row.get(0),
            )
            .map_err(store_err)
    }

    // ── lore ─────────────────────────────────────────────────────────

    /// All lore entries, ordered by subject.
    pub fn lore_entries(&self) -> Result<Vec<LoreEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT subject, data, source FROM lore ORDER BY subject ASC")
            .map_err(store_err)?;
        let entries = stmt
            .query_map([], |row| {
                Ok(LoreEntry {
                    subject: row.get(0)?,
                    data: row.get(1)?,
                    source: row.get(2)?,
                })
            })
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;
        Ok(entries)
    }

    // ── pipeline events ──────────────────────────────────────────────

    /// Append a pipeline event. The caller's `stepNumber` must be
    /// exactly one past the count of prior events for the turn; the
    /// contiguity invariant is enforced at the write.
    pub fn append_pipeline_event(&self, event: &PipelineEventRecord) -> Result<()> {
        let prior = self.count_pipeline_events(event.turn)?;
        if event.step_number != prior + 1 {
            return Err(Error::Store(format!(
                "pipeline event for turn {} has step {} but {} prior events exist",
                event.turn, event.step_number, prior
            )));
        }

        self.conn
            .execute(
                "INSERT INTO pipeline_events (run_id, turn, step_number, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.run_id,
                    event.turn,
                    event.step_number,
                    serde_json::to_string(event)?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Pipeline events for a turn in step order.
    pub fn list_pipeline_events(&self, turn: u32) -> Result<Vec<PipelineEventRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT payload FROM pipeline_events
                 WHERE turn = ?1 ORDER BY step_number ASC",
            )
            .map_err(store_err)?;
        let payloads = stmt
            .query_map(params![turn], |row| row.get::<_, String>(0))
            .map_err(store_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_err)?;

        payloads
            .into_iter()
            .map(|p| serde_json::from_str(&p).map_err(Error::from))
            .collect()
    }

    pub fn count_pipeline_events(&self, turn: u32) -> Result<u32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM pipeline_events WHERE turn = ?1",
                params![turn],
                |row| row.get(0),
            )
            .map_err(store_err)
    }

    // ── turn executions ──────────────────────────────────────────────

    /// Insert a new execution row. Fails with `ExecutionAlreadyExists`
    /// when `(runId, turn)` is already present.
    pub fn create_turn_execution(&self, execution: &TurnExecution) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO turn_execution
               (run_id, turn, mode, cursor, completed, player_input, player_id,
                request_id, game_project_id, checkpoint, result, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                execution.run_id,
                execution.turn,
                execution.mode.as_str(),
                execution.cursor as i64,
                execution.completed,
                execution.player_input,
                execution.player_id,
                execution.request_id,
                execution.game_project_id,
                serde_json::to_string(&execution.checkpoint)?,
                execution
                    .result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                execution.created_at.to_rfc3339(),
                execution.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::ExecutionAlreadyExists {
                    turn: execution.turn,
                })
            }
            Err(e) => Err(store_err(e)),
        }
    }

    /// Delete an abandoned execution row so a fresh attempt can reuse
    /// the same turn index.
    pub fn delete_turn_execution(&self, turn: u32) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM turn_execution WHERE run_id = ?1 AND turn = ?2",
                params![self.run_id, turn],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// The run's live (non-completed) execution, if any.
    pub fn active_execution(&self) -> Result<Option<TurnExecution>> {
        self.query_execution(
            "SELECT run_id, turn, mode, cursor, completed, player_input, player_id,
                    request_id, game_project_id, checkpoint, result, created_at, updated_at
             FROM turn_execution WHERE run_id = ?1 AND completed = 0
             ORDER BY turn DESC LIMIT 1",
            params![self.run_id],
        )
    }

    pub fn get_turn_execution(&self, turn: u32) -> Result<Option<TurnExecution>> {
        self.query_execution(
            "SELECT run_id, turn, mode, cursor, completed, player_input, player_id,
                    request_id, game_project_id, checkpoint, result, created_at, updated_at
             FROM turn_execution WHERE run_id = ?1 AND turn = ?2",
            params![self.run_id, turn],
        )
    }

    /// The persisted mid-turn checkpoint, if the execution row exists.
    pub fn read_execution_checkpoint(&self, turn: u32) -> Result<Option<Checkpoint>> {
        Ok(self.get_turn_execution(turn)?.map(|e| e.checkpoint))
    }

    /// Monotonic progress update. The cursor may never move backwards;
    /// a completed row is terminal.
    pub fn update_execution_progress(
        &self,
        turn: u32,
        cursor: usize,
        checkpoint: &Checkpoint,
        completed: bool,
        result: Option<&ExecutionResult>,
    ) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE turn_execution
                 SET cursor = ?3, checkpoint = ?4, completed = ?5,
                     result = COALESCE(?6, result), updated_at = ?7
                 WHERE run_id = ?1 AND turn = ?2 AND completed = 0 AND cursor <= ?3",
                params![
                    self.run_id,
                    turn,
                    cursor as i64,
                    serde_json::to_string(checkpoint)?,
                    completed,
                    result.map(serde_json::to_string).transpose()?,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(store_err)?;

        if affected == 0 {
            return Err(Error::Store(format!(
                "turn {turn} execution is missing, completed, or past cursor {cursor}"
            )));
        }
        Ok(())
    }

    fn query_execution(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<TurnExecution>> {
        let row = self
            .conn
            .query_row(sql, params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, String>(12)?,
                ))
            })
            .optional()
            .map_err(store_err)?;

        let Some((
            run_id,
            turn,
            mode,
            cursor,
            completed,
            player_input,
            player_id,
            request_id,
            game_project_id,
            checkpoint,
            result,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let mode = match mode.as_str() {
            "normal" => ExecutionMode::Normal,
            "step" => ExecutionMode::Step,
            other => return Err(Error::Store(format!("unknown execution mode {other:?}"))),
        };

        Ok(Some(TurnExecution {
            run_id,
            turn,
            mode,
            cursor: cursor as usize,
            completed,
            player_input,
            player_id,
            request_id,
            game_project_id,
            checkpoint: serde_json::from_str(&checkpoint)?,
            result: result.as_deref().map(serde_json::from_str).transpose()?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }
}

/// Parse an RFC 3339 timestamp persisted by this store.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("bad timestamp {raw:?}: {e}")))
}
