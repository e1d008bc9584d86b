//! `loom-gateway` — the StoryLoom turn router service.
//!
//! An axum API in front of the eight-stage narrative pipeline: each
//! player input is sequenced through intent extraction, lore
//! retrieval, plausibility pre/post checks, simulation, arbitration,
//! and narration, with every hop audited in the per-run store.

pub mod api;
pub mod projects;
pub mod runtime;
pub mod state;
