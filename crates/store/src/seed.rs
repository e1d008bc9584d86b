//! Lore seeding.
//!
//! At run creation the game project's lore corpus is copied into the
//! per-run `lore` table so the retrieval stage reads a stable index:
//!
//! - `lore/world.md` → one entry with subject `world_context`;
//! - `lore/default_lore_entries.csv` → one entry per row. The sheet
//!   must have a `subject` column; the body comes from the first of
//!   `data`, `description`, or `entry`.
//!
//! Seeding is idempotent (`INSERT OR IGNORE` on the subject key) and
//! both sources are optional.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};

use loom_domain::error::{Error, Result};

use crate::store_err;

/// Subject key of the world-context entry.
pub const WORLD_CONTEXT_SUBJECT: &str = "world_context";

const BODY_COLUMNS: [&str; 3] = ["data", "description", "entry"];

/// Seed the `lore` table from the game project directory. Returns the
/// number of entries present after seeding.
pub fn seed_lore(conn: &Connection, project_dir: &Path) -> Result<usize> {
    let world_path = project_dir.join("lore").join("world.md");
    if world_path.exists() {
        let data = std::fs::read_to_string(&world_path)?;
        insert_ignore(conn, WORLD_CONTEXT_SUBJECT, data.trim(), "lore/world.md")?;
    }

    let csv_path = project_dir.join("lore").join("default_lore_entries.csv");
    if csv_path.exists() {
        seed_from_csv(conn, &csv_path)?;
    }

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM lore", [], |row| row.get(0))
        .map_err(store_err)?;
    Ok(count as usize)
}

fn seed_from_csv(conn: &Connection, csv_path: &Path) -> Result<()> {
    let mut reader = csv::Reader::from_path(csv_path)
        .map_err(|e| Error::Store(format!("reading {}: {e}", csv_path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::Store(format!("reading {} headers: {e}", csv_path.display())))?
        .clone();

    let subject_col = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("subject"))
        .ok_or_else(|| {
            Error::Store(format!("{} has no 'subject' column", csv_path.display()))
        })?;
    let body_col = headers
        .iter()
        .position(|h| {
            BODY_COLUMNS
                .iter()
                .any(|c| h.trim().eq_ignore_ascii_case(c))
        })
        .ok_or_else(|| {
            Error::Store(format!(
                "{} has no data/description/entry column",
                csv_path.display()
            ))
        })?;

    let source = "lore/default_lore_entries.csv";
    for record in reader.records() {
        let record =
            record.map_err(|e| Error::Store(format!("reading {}: {e}", csv_path.display())))?;
        let subject = record.get(subject_col).unwrap_or("").trim();
        let data = record.get(body_col).unwrap_or("").trim();
        if subject.is_empty() || data.is_empty() {
            continue;
        }
        insert_ignore(conn, subject, data, source)?;
    }

    Ok(())
}

fn insert_ignore(conn: &Connection, subject: &str, data: &str, source: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO lore (subject, data, source, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![subject, data, source, Utc::now().to_rfc3339()],
    )
    .map_err(store_err)?;
    Ok(())
}
