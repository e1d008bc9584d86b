//! `loom-modules` — transport to the narrative module services.
//!
//! Two small pieces:
//!
//! - [`registry`] resolves `(role, manifest binding)` to a base URL
//!   with binding → env override → localhost-default precedence;
//! - [`client::ModuleClient`] posts the uniform request envelope and
//!   strictly validates the `{meta, output, debug?}` response against
//!   the role's schema, with a per-request timeout and **no retries**.

pub mod client;
pub mod registry;

pub use client::ModuleClient;
