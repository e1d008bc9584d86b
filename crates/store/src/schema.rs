//! Per-run SQLite schema.
//!
//! One `world_state.db` per run. Everything except `turn_execution` is
//! append-only; `turn_execution` is the single mutable surface
//! (cursor/checkpoint/completed/result), mutated only by the pipeline
//! driver.

use rusqlite::Connection;

use loom_domain::error::Result;

use crate::store_err;

/// Initialize pragmas and tables. Idempotent.
pub fn init_schema(conn: &Connection) -> Result<()> {
    // WAL for crash safety; a single process holds the writer.
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(store_err)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(store_err)?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            turn INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            turn INTEGER NOT NULL,
            world_state TEXT NOT NULL,
            view_state TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lore (
            subject TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS turn_execution (
            run_id TEXT NOT NULL,
            turn INTEGER NOT NULL,
            mode TEXT NOT NULL,
            cursor INTEGER NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            player_input TEXT NOT NULL,
            player_id TEXT NOT NULL,
            request_id TEXT NOT NULL,
            game_project_id TEXT NOT NULL,
            checkpoint TEXT NOT NULL,
            result TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (run_id, turn)
        );

        CREATE TABLE IF NOT EXISTS pipeline_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            turn INTEGER NOT NULL,
            step_number INTEGER NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_turn ON events(turn, id);
        CREATE INDEX IF NOT EXISTS idx_snapshots_turn ON snapshots(turn);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pipeline_step
            ON pipeline_events(run_id, turn, step_number);
        "#,
    )
    .map_err(store_err)?;

    Ok(())
}
