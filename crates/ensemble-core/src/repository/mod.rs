//! Storage ports for the engine.
//!
//! The infrastructure layer (ensemble-infra) implements these traits with
//! SQLite persistence; tests implement them in memory. `update_*` operations
//! are partial field merges, never full overwrites.

pub mod artifact;
pub mod budget;
pub mod memory;
pub mod workflow;

pub use artifact::ArtifactRepository;
pub use budget::BudgetRepository;
pub use workflow::WorkflowRepository;
