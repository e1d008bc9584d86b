//! Run discovery by directory scan.
//!
//! The saved folder is authoritative: a run exists iff
//! `<gameProjectsRoot>/<gameProjectId>/saved/<runId>/world_state.db`
//! exists. No registry of runs is kept anywhere else.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use loom_domain::error::Result;

use crate::store::{DB_FILE, SAVED_DIR};

/// One discovered run of a game project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Location of a run found by [`resolve_run_location`].
#[derive(Debug, Clone)]
pub struct RunLocation {
    pub game_project_id: String,
    pub run_dir: PathBuf,
}

/// Enumerate a game project's runs, newest database first.
pub fn list_sessions(projects_root: &Path, game_project_id: &str) -> Result<Vec<SessionInfo>> {
    let saved = projects_root.join(game_project_id).join(SAVED_DIR);
    if !saved.is_dir() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(&saved)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let db_path = entry.path().join(DB_FILE);
        if !db_path.is_file() {
            continue;
        }
        let created_at = db_birth_time(&db_path)?;
        sessions.push(SessionInfo {
            session_id: entry.file_name().to_string_lossy().into_owned(),
            created_at,
        });
    }

    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(sessions)
}

/// Scan every game project directory for a run with the given ID.
pub fn resolve_run_location(projects_root: &Path, run_id: &str) -> Result<Option<RunLocation>> {
    if !projects_root.is_dir() {
        return Ok(None);
    }

    for entry in std::fs::read_dir(projects_root)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let run_dir = entry.path().join(SAVED_DIR).join(run_id);
        if run_dir.join(DB_FILE).is_file() {
            return Ok(Some(RunLocation {
                game_project_id: entry.file_name().to_string_lossy().into_owned(),
                run_dir,
            }));
        }
    }

    Ok(None)
}

/// DB file creation time; platforms without birth time fall back to
/// the modification time.
fn db_birth_time(db_path: &Path) -> Result<DateTime<Utc>> {
    let metadata = std::fs::metadata(db_path)?;
    let time = metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(DateTime::<Utc>::from(time))
}
