//! Shared domain types for the Ensemble workflow engine.
//!
//! This crate contains the core domain types used across the Ensemble
//! workspace: workflow templates and executions, artifacts, budget trackers,
//! provider contract shapes, and broadcast events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod artifact;
pub mod budget;
pub mod error;
pub mod event;
pub mod llm;
pub mod workflow;
