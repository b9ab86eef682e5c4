//! # CodeChat LLM
//!
//! Prompt construction and provider dispatch for chat queries.
//!
//! ```text
//! QueryRequest + ContextBundle
//!     │
//!     ├──> PromptBuilder
//!     │      └─ system prompt, context, history, message
//!     │
//!     └──> LlmRouter
//!            ├─ ProviderRegistry ──> ProviderAdapter (HTTP: OpenAI dialect, Anthropic dialect)
//!            ├─ retry with backoff until the first delta reaches the caller
//!            ├─ per-attempt timeout / idle timeout between deltas
//!            └─ ResponseStream: Delta* then Completed | Failed, aborts on drop
//! ```

mod error;
mod http;
mod prompt;
mod provider;
mod router;
mod state;

pub use error::{ProviderError, Result, RouterError};
pub use http::{
    sse_deltas, Dialect, HttpChatAdapter, ProviderSettings, SseDecoder, SseEvent,
    ANTHROPIC_VERSION, DEFAULT_AZURE_API_VERSION,
};
pub use prompt::{render_context, PromptBuilder, DEFAULT_SYSTEM_PROMPT};
pub use provider::{
    CompletionRequest, DeltaStream, ProviderAdapter, ProviderRegistry, DEFAULT_MAX_TOKENS,
};
pub use router::{LlmRouter, ResponseStream, RetryPolicy, RouterConfig, StreamEvent};
pub use state::{FailureKind, QueryLifecycle, QueryState};
