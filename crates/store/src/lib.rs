//! `loom-store` — per-run durable state.
//!
//! One SQLite file per run under the game project's `saved/` folder,
//! holding the append-only event log, snapshots, pipeline events, the
//! seeded lore index, and the single mutable `turn_execution` table.
//! [`projection`] reconstitutes the player/debug views from the event
//! log; [`discover`] finds runs by directory scan.

pub mod discover;
pub mod projection;
pub mod schema;
pub mod seed;
pub mod store;

pub use discover::{list_sessions, resolve_run_location, RunLocation, SessionInfo};
pub use projection::{read_session_state, SessionState};
pub use store::{LoreEntry, RunStore};

use loom_domain::error::Error;

/// Map a rusqlite failure into the shared store error.
pub(crate) fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}
