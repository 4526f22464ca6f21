//! Workflow engine: templates, prompt rendering, phase execution, and the
//! orchestrator that ties them together.

pub mod orchestrator;
pub mod phase_runner;
pub mod prompt;
pub mod registry;
pub mod template;

pub use orchestrator::{CreateExecution, Orchestrator, RecoveryReport};
pub use phase_runner::PhaseRunner;
pub use prompt::render_prompt;
pub use registry::ExecutionRegistry;
pub use template::{standard_pipeline, TemplateService};
