use crate::error::{ProviderError, Result, RouterError};
use crate::prompt::{PromptBuilder, DEFAULT_SYSTEM_PROMPT};
use crate::provider::{CompletionRequest, ProviderAdapter, ProviderRegistry};
use codechat_protocol::{ProviderKind, QueryRequest};
use codechat_search::ContextBundle;
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// `base_backoff * 2^attempt`, capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub retry: RetryPolicy,

    /// Bound on a whole non-streaming call, and on opening a stream
    pub request_timeout: Duration,

    /// Longest silence tolerated between two streamed deltas
    pub stream_idle_timeout: Duration,

    pub system_prompt: String,

    /// Deltas buffered between the provider task and the caller
    pub stream_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Duration::from_secs(30),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            stream_buffer: 64,
        }
    }
}

/// Item of a [`ResponseStream`]. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Completed,
    Failed(RouterError),
}

impl StreamEvent {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }
}

/// Deltas of one routed query followed by exactly one terminal event.
///
/// Dropping the stream aborts the producer task and with it the in-flight
/// provider call.
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<()>,
}

impl ResponseStream {
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drain the stream into the full answer
    pub async fn into_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(event) = self.rx.recv().await {
            match event {
                StreamEvent::Delta(delta) => text.push_str(&delta),
                StreamEvent::Completed => return Ok(text),
                StreamEvent::Failed(err) => return Err(err),
            }
        }
        Err(RouterError::Cancelled)
    }
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Selects the provider for a query, builds its prompt and dispatches it
/// with retry, timeout and cancellation handling.
///
/// Retries happen only while nothing of the current attempt has reached the
/// caller, so a caller never sees duplicated output. No lock is held across
/// a provider call.
pub struct LlmRouter {
    registry: Arc<ProviderRegistry>,
    config: RouterConfig,
    prompt: PromptBuilder,
}

impl LlmRouter {
    pub fn new(registry: ProviderRegistry, config: RouterConfig) -> Self {
        let prompt = PromptBuilder::new(config.system_prompt.clone());
        Self {
            registry: Arc::new(registry),
            config,
            prompt,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn ensure_configured(&self, kind: ProviderKind) -> Result<()> {
        self.registry.get(kind).map(|_| ())
    }

    pub fn prompt(&self, query: &QueryRequest, context: &ContextBundle) -> CompletionRequest {
        self.prompt.build(query, context)
    }

    /// Wait for the complete answer
    pub async fn complete(&self, kind: ProviderKind, request: &CompletionRequest) -> Result<String> {
        let adapter = self.registry.get(kind)?;
        let timeout = self.config.request_timeout;
        let mut attempt = 0;
        loop {
            let failure = match tokio::time::timeout(timeout, adapter.complete(request)).await {
                Ok(Ok(text)) => {
                    log::debug!("{kind} answered on attempt {}", attempt + 1);
                    return Ok(text);
                }
                Ok(Err(err)) => AttemptFailure::Provider(err),
                Err(_) => AttemptFailure::TimedOut(timeout),
            };
            match next_delay(&self.config.retry, kind, attempt, &failure) {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(failure.into_router_error(attempt + 1)),
            }
        }
    }

    /// Start a streaming call on a background task
    pub fn stream(&self, kind: ProviderKind, request: CompletionRequest) -> Result<ResponseStream> {
        let adapter = self.registry.get(kind)?;
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let config = self.config.clone();
        let task = tokio::spawn(produce(adapter, request, config, tx));
        Ok(ResponseStream { rx, task })
    }
}

enum AttemptFailure {
    Provider(ProviderError),
    TimedOut(Duration),
}

impl AttemptFailure {
    const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_retryable(),
            Self::TimedOut(_) => true,
        }
    }

    fn into_router_error(self, attempts: u32) -> RouterError {
        match self {
            Self::Provider(ProviderError::Auth(message)) => RouterError::Auth(message),
            Self::Provider(ProviderError::InvalidRequest(message)) => {
                RouterError::Validation(message)
            }
            Self::Provider(ProviderError::RateLimited(message) | ProviderError::Transient(message)) => {
                RouterError::Transient { attempts, message }
            }
            Self::TimedOut(after) => RouterError::Timeout(after),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(err) => fmt::Display::fmt(err, f),
            Self::TimedOut(after) => write!(f, "no response within {after:?}"),
        }
    }
}

/// Delay before the next attempt, or `None` when the failure is final
fn next_delay(
    policy: &RetryPolicy,
    kind: ProviderKind,
    attempt: u32,
    failure: &AttemptFailure,
) -> Option<Duration> {
    if !failure.is_retryable() {
        log::warn!("{kind} call failed permanently: {failure}");
        return None;
    }
    if attempt >= policy.max_retries {
        log::warn!("{kind} call failed after {} attempt(s): {failure}", attempt + 1);
        return None;
    }
    let delay = policy.backoff(attempt);
    log::info!(
        "{kind} attempt {} failed: {failure}; retrying in {delay:?}",
        attempt + 1
    );
    Some(delay)
}

enum AttemptEnd {
    Failed {
        failure: AttemptFailure,
        delivered: bool,
    },
    /// Caller dropped the stream
    Closed,
}

async fn produce(
    adapter: Arc<dyn ProviderAdapter>,
    request: CompletionRequest,
    config: RouterConfig,
    tx: mpsc::Sender<StreamEvent>,
) {
    let kind = adapter.kind();
    let mut attempt = 0;
    let terminal = loop {
        match stream_attempt(adapter.as_ref(), &request, &config, &tx).await {
            Ok(()) => break StreamEvent::Completed,
            Err(AttemptEnd::Closed) => {
                log::debug!("{kind} stream abandoned by caller");
                return;
            }
            Err(AttemptEnd::Failed { failure, delivered }) => {
                if delivered {
                    log::warn!("{kind} stream failed after partial output: {failure}");
                    break StreamEvent::Failed(failure.into_router_error(attempt + 1));
                }
                match next_delay(&config.retry, kind, attempt, &failure) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => break StreamEvent::Failed(failure.into_router_error(attempt + 1)),
                }
            }
        }
    };
    let _ = tx.send(terminal).await;
}

async fn stream_attempt(
    adapter: &dyn ProviderAdapter,
    request: &CompletionRequest,
    config: &RouterConfig,
    tx: &mpsc::Sender<StreamEvent>,
) -> std::result::Result<(), AttemptEnd> {
    let failed = |failure, delivered| AttemptEnd::Failed { failure, delivered };

    let mut deltas = match tokio::time::timeout(config.request_timeout, adapter.stream(request)).await {
        Ok(Ok(deltas)) => deltas,
        Ok(Err(err)) => return Err(failed(AttemptFailure::Provider(err), false)),
        Err(_) => return Err(failed(AttemptFailure::TimedOut(config.request_timeout), false)),
    };

    let mut delivered = false;
    loop {
        match tokio::time::timeout(config.stream_idle_timeout, deltas.next()).await {
            Err(_) => {
                return Err(failed(
                    AttemptFailure::TimedOut(config.stream_idle_timeout),
                    delivered,
                ))
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(err))) => return Err(failed(AttemptFailure::Provider(err), delivered)),
            Ok(Some(Ok(delta))) => {
                if delta.is_empty() {
                    continue;
                }
                if tx.send(StreamEvent::Delta(delta)).await.is_err() {
                    return Err(AttemptEnd::Closed);
                }
                delivered = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn provider_failures_map_to_router_errors() {
        let auth = AttemptFailure::Provider(ProviderError::Auth("k".into()));
        assert_eq!(auth.into_router_error(1), RouterError::Auth("k".into()));

        let limited = AttemptFailure::Provider(ProviderError::RateLimited("slow".into()));
        assert_eq!(
            limited.into_router_error(4),
            RouterError::Transient {
                attempts: 4,
                message: "slow".into()
            }
        );

        let bad = AttemptFailure::Provider(ProviderError::InvalidRequest("model".into()));
        assert_eq!(bad.into_router_error(1), RouterError::Validation("model".into()));
    }
}
