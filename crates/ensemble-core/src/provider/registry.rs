//! Provider registry for runtime backend lookup.
//!
//! Phases carry a `ProviderType` tag; the registry resolves it to a boxed
//! provider at dispatch time. Registrations happen during engine startup,
//! lookups from every phase run, so a concurrent map keeps reads lock-free.

use std::sync::Arc;

use dashmap::DashMap;

use ensemble_types::llm::{LlmError, ProviderType};

use super::box_provider::BoxLlmProvider;

/// Registry of available LLM providers, indexed by provider type.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<ProviderType, Arc<BoxLlmProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    /// Register a provider for the given type.
    ///
    /// If a provider for this type already exists, it is replaced.
    pub fn register(&self, provider_type: ProviderType, provider: BoxLlmProvider) {
        self.providers.insert(provider_type, Arc::new(provider));
    }

    /// Look up a provider by type.
    pub fn get(&self, provider_type: ProviderType) -> Result<Arc<BoxLlmProvider>, LlmError> {
        self.providers
            .get(&provider_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LlmError::UnknownProvider(provider_type.to_string()))
    }

    /// All registered provider types.
    pub fn list_types(&self) -> Vec<ProviderType> {
        self.providers.iter().map(|entry| *entry.key()).collect()
    }
}
