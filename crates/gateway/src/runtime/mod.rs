//! Turn runtime: the pipeline driver, per-stage executors, the refusal
//! predicate, and per-run locking.

pub mod driver;
pub mod refusal;
pub mod run_lock;
pub mod stages;

pub use driver::{run_context, Pipeline, TurnFailure, TurnRequest};
pub use run_lock::RunLockMap;
