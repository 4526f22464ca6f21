//! LlmProvider trait definition.
//!
//! This is the core abstraction that all backends implement. Uses RPITIT
//! for `generate`, `check_health`, and `list_models`, and
//! `Pin<Box<dyn Stream>>` for `stream` (streams need to be object-safe for
//! the BoxLlmProvider wrapper).

use std::pin::Pin;

use futures_util::Stream;

use ensemble_types::llm::{GenerationRequest, GenerationResult, LlmError, ModelInfo, StreamEvent};

/// Trait for language-model backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition) for the
/// request/response methods. The `stream` method returns a boxed stream
/// because streams need to be object-safe for `BoxLlmProvider`.
///
/// Concrete clients live outside the engine; tests use scripted providers.
pub trait LlmProvider: Send + Sync {
    /// Stable provider name (e.g., "ollama", "openai").
    fn name(&self) -> &str;

    /// Send a generation request and receive the full response.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl std::future::Future<Output = Result<GenerationResult, LlmError>> + Send;

    /// Send a streaming generation request. Returns a stream of events.
    ///
    /// The stream is finite and ends with `StreamEvent::Done` (or an error).
    /// Dropping it early releases the underlying connection.
    fn stream(
        &self,
        request: GenerationRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

    /// Whether the backend is currently reachable and serving.
    fn check_health(&self) -> impl std::future::Future<Output = bool> + Send;

    /// Models this backend can serve.
    fn list_models(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ModelInfo>, LlmError>> + Send;
}
