use crate::modules::ModuleRole;

/// Shared error type used across all StoryLoom crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("network: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("module {role} returned HTTP {status}: {body_snippet}")]
    Http {
        role: ModuleRole,
        status: u16,
        body_snippet: String,
    },

    #[error("module {role} schema violation: {issue}")]
    Schema { role: ModuleRole, issue: String },

    #[error("store: {0}")]
    Store(String),

    #[error("turn execution already exists for turn {turn}")]
    ExecutionAlreadyExists { turn: u32 },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("game project not found: {0}")]
    GameProjectNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
