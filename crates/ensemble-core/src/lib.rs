//! Workflow orchestration engine for Ensemble.
//!
//! This crate defines the "ports" (repository traits, provider contract)
//! that the infrastructure layer implements, plus the engine itself: budget
//! ledger, artifact store, template service, phase runner, and orchestrator.
//! It depends only on `ensemble-types` -- never on `ensemble-infra` or any
//! database/HTTP crate.

pub mod artifact;
pub mod budget;
pub mod event;
pub mod provider;
pub mod repository;
pub mod workflow;
