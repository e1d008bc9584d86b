//! `loom-domain` — shared contracts for the StoryLoom turn router.
//!
//! Everything the other crates agree on lives here: the error type,
//! env-driven configuration, the module-role wire schemas, diff
//! operations, the cross-stage [`checkpoint::Checkpoint`], the fixed
//! [`pipeline::Stage`] list with its audit records, and the structured
//! [`trace::TraceEvent`] log events.
//!
//! The crate is deliberately dependency-light (serde + chrono +
//! thiserror + tracing); transport and storage concerns live in
//! `loom-modules` and `loom-store`.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod execution;
pub mod modules;
pub mod pipeline;
pub mod trace;

pub use checkpoint::Checkpoint;
pub use context::RunContext;
pub use error::{Error, Result};
