use crate::error::{ProviderError, Result, RouterError};
use async_trait::async_trait;
use codechat_protocol::{ChatMessage, ProviderKind, Role};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered text deltas of one provider call, finite once the provider is done
pub type DeltaStream = BoxStream<'static, std::result::Result<String, ProviderError>>;

/// Default completion length for providers that require one
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Fully built prompt for one provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// System messages joined, for APIs that take the system prompt apart
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }

    /// Everything except system messages
    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// One LLM backend.
///
/// Implementations must report auth failures, rate limits and other
/// transient failures as distinct [`ProviderError`] variants so the router
/// can decide whether to retry.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Wait for the whole answer
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderError>;

    /// Open a streaming call. Dropping the returned stream aborts the call.
    async fn stream(&self, request: &CompletionRequest) -> std::result::Result<DeltaStream, ProviderError>;
}

/// Adapters keyed by provider kind
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under its own kind, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let kind = adapter.kind();
        if self.adapters.insert(kind, adapter).is_some() {
            log::debug!("Replaced adapter for provider {kind}");
        }
    }

    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(RouterError::ProviderNotConfigured(kind))
    }

    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Configured kinds in declaration order
    pub fn configured(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.adapters.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("configured", &self.configured())
            .finish()
    }
}
