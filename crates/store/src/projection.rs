//! State projection: fold the append-only event log into the views the
//! UI consumes.
//!
//! The projection is a pure function of the persisted rows — reading
//! it any number of times yields the same result, and it never touches
//! the execution table.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use loom_domain::error::Result;

use crate::store::{RunStore, EVENT_MODULE_TRACE, EVENT_PLAYER_INPUT};

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Player,
    Engine,
}

/// One chat transcript entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub turn: u32,
    pub role: MessageRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// One per-turn debug entry carrying the full turn trace.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEntry {
    pub timestamp: DateTime<Utc>,
    pub turn: u32,
    pub trace: Value,
}

/// The reconstituted session view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub messages: Vec<ChatMessage>,
    pub debug_entries: Vec<DebugEntry>,
    pub next_turn: u32,
}

/// Fold `events` ordered by `(turn, id)` into the session view.
pub fn read_session_state(store: &RunStore) -> Result<SessionState> {
    let mut messages = Vec::new();
    let mut debug_entries = Vec::new();

    for event in store.list_events()? {
        match event.event_type.as_str() {
            EVENT_PLAYER_INPUT => {
                let text = event
                    .payload
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                messages.push(ChatMessage {
                    turn: event.turn,
                    role: MessageRole::Player,
                    text,
                    timestamp: event.created_at,
                });
            }
            EVENT_MODULE_TRACE => {
                if let Some(text) = event
                    .payload
                    .get("narrationText")
                    .and_then(Value::as_str)
                {
                    messages.push(ChatMessage {
                        turn: event.turn,
                        role: MessageRole::Engine,
                        text: text.to_owned(),
                        timestamp: event.created_at,
                    });
                }
                debug_entries.push(DebugEntry {
                    timestamp: event.created_at,
                    turn: event.turn,
                    trace: event.payload,
                });
            }
            // committed_diff rows feed snapshots, not the transcript.
            _ => {}
        }
    }

    Ok(SessionState {
        messages,
        debug_entries,
        next_turn: store.next_turn()?,
    })
}
