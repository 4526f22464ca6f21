//! LLM provider abstraction.
//!
//! The `LlmProvider` trait is the seam between the engine and concrete
//! backends. `BoxLlmProvider` type-erases implementations so the registry
//! can dispatch on a phase's configured `ProviderType` at runtime.

mod box_provider;
mod llm_provider;
mod registry;

pub use box_provider::{BoxLlmProvider, LlmProviderDyn};
pub use llm_provider::LlmProvider;
pub use registry::ProviderRegistry;
