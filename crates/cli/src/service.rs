use codechat_indexer::{Indexer, PipelineStatus};
use codechat_llm::{
    CompletionRequest, FailureKind, LlmRouter, QueryLifecycle, QueryState, ResponseStream,
    RouterError, StreamEvent,
};
use codechat_protocol::{
    ContextSource, ErrorEnvelope, HealthReport, IndexingCounters, ProviderKind, QueryRequest,
    QueryResponse, ValidationError, ERR_TIMEOUT, ERR_UNEXPECTED, ERR_VALIDATION,
};
use codechat_search::{ContextAssembler, ContextBundle, SearchError};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

pub const UNEXPECTED_MESSAGE: &str = "An internal server error occurred";

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Router(RouterError),

    #[error("Context assembly failed: {0}")]
    Search(SearchError),

    #[error("query did not finish within {0:?}")]
    Timeout(Duration),
}

impl From<RouterError> for QueryError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::ProviderNotConfigured(kind) => {
                Self::Validation(ValidationError::ProviderNotConfigured(kind.to_string()))
            }
            other => Self::Router(other),
        }
    }
}

impl From<SearchError> for QueryError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::UnknownFile(path) => Self::Validation(ValidationError::UnknownFile(path)),
            SearchError::EmptyQuery => Self::Validation(ValidationError::EmptyField("message")),
            other => Self::Search(other),
        }
    }
}

impl QueryError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => ERR_VALIDATION,
            Self::Router(err) => err.code(),
            Self::Search(_) => ERR_UNEXPECTED,
            Self::Timeout(_) => ERR_TIMEOUT,
        }
    }

    /// Wire error; internal failures never leak their details
    pub fn envelope(&self) -> ErrorEnvelope {
        let code = self.code();
        if code == ERR_UNEXPECTED {
            ErrorEnvelope::new(code, UNEXPECTED_MESSAGE)
        } else {
            ErrorEnvelope::new(code, self.to_string())
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Router(err) => FailureKind::from(err),
            Self::Search(_) => FailureKind::Internal,
            Self::Timeout(_) => FailureKind::Timeout,
        }
    }
}

/// Query whose context has been assembled and whose prompt is ready
#[derive(Debug)]
pub struct PreparedQuery {
    pub provider: ProviderKind,
    pub model: String,
    pub completion: CompletionRequest,
    pub sources: Vec<ContextSource>,
    lifecycle: QueryLifecycle,
}

impl PreparedQuery {
    pub fn request_id(&self) -> &str {
        self.lifecycle.request_id()
    }

    pub const fn state(&self) -> QueryState {
        self.lifecycle.state()
    }
}

/// Everything a `/query` or `/health` call needs: index state, context
/// assembly and provider routing.
pub struct QueryService {
    indexer: Arc<Indexer>,
    assembler: ContextAssembler,
    router: LlmRouter,
    pipeline: Option<watch::Receiver<PipelineStatus>>,
    request_timeout: Duration,
}

impl QueryService {
    pub fn new(indexer: Arc<Indexer>, assembler: ContextAssembler, router: LlmRouter) -> Self {
        Self {
            indexer,
            assembler,
            router,
            pipeline: None,
            request_timeout: Duration::from_secs(180),
        }
    }

    #[must_use]
    pub fn with_pipeline_status(mut self, status: watch::Receiver<PipelineStatus>) -> Self {
        self.pipeline = Some(status);
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub const fn router(&self) -> &LlmRouter {
        &self.router
    }

    pub fn health(&self) -> HealthReport {
        let summary = self.indexer.summary();
        let graph = self.indexer.graph().stats();
        let stats = self.indexer.stats_snapshot();
        let pending_jobs = self
            .pipeline
            .as_ref()
            .map_or(0, |status| status.borrow().pending_jobs);

        HealthReport {
            status: "ok".to_string(),
            indexed_files: summary.indexed_files,
            chunks: summary.chunks,
            graph_files: graph.files,
            graph_functions: graph.functions,
            degraded_files: summary.degraded_files,
            unindexable_files: summary.unindexable_files,
            pending_jobs,
            indexing: IndexingCounters {
                files_indexed: stats.files_indexed,
                files_deleted: stats.files_deleted,
                files_degraded: stats.files_degraded,
                chunks_embedded: stats.chunks_embedded,
                chunks_reused: stats.chunks_reused,
                parse_failures: stats.parse_failures,
                recent_errors: stats.errors,
            },
        }
    }

    /// Validate the request, assemble its context and build the prompt.
    /// Nothing is sent to a provider yet.
    pub async fn prepare(
        &self,
        request: &QueryRequest,
        request_id: impl Into<String>,
    ) -> Result<PreparedQuery, QueryError> {
        let mut lifecycle = QueryLifecycle::new(request_id);
        match self.build(request).await {
            Ok((completion, bundle)) => {
                lifecycle.advance(QueryState::ContextAssembled);
                log::info!(
                    "[{}] {} context snippet(s), {} token(s) for {}/{}",
                    lifecycle.request_id(),
                    bundle.len(),
                    bundle.total_tokens,
                    request.provider,
                    request.model
                );
                Ok(PreparedQuery {
                    provider: request.provider,
                    model: request.model.clone(),
                    completion,
                    sources: sources(&bundle),
                    lifecycle,
                })
            }
            Err(err) => {
                lifecycle.advance(QueryState::Failed(err.failure_kind()));
                log::info!("[{}] query rejected: {err}", lifecycle.request_id());
                Err(err)
            }
        }
    }

    async fn build(
        &self,
        request: &QueryRequest,
    ) -> Result<(CompletionRequest, ContextBundle), QueryError> {
        request.validate()?;
        self.router.ensure_configured(request.provider)?;
        let bundle = self
            .assembler
            .assemble(&request.message, &request.files)
            .await?;
        Ok((self.router.prompt(request, &bundle), bundle))
    }

    /// Wait for the whole answer
    pub async fn answer(&self, mut prepared: PreparedQuery) -> Result<QueryResponse, QueryError> {
        prepared.lifecycle.advance(QueryState::Dispatched);
        let call = self.router.complete(prepared.provider, &prepared.completion);
        let outcome = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(QueryError::from),
            Err(_) => Err(QueryError::Timeout(self.request_timeout)),
        };
        match outcome {
            Ok(text) => {
                prepared.lifecycle.advance(QueryState::Completed);
                Ok(QueryResponse {
                    text,
                    provider: prepared.provider,
                    model: prepared.model,
                    sources: prepared.sources,
                })
            }
            Err(err) => {
                prepared
                    .lifecycle
                    .advance(QueryState::Failed(err.failure_kind()));
                Err(err)
            }
        }
    }

    /// Start streaming the answer
    pub fn stream(&self, prepared: PreparedQuery) -> Result<QueryStream, QueryError> {
        let PreparedQuery {
            provider,
            completion,
            sources,
            mut lifecycle,
            ..
        } = prepared;
        match self.router.stream(provider, completion) {
            Ok(inner) => {
                lifecycle.advance(QueryState::Dispatched);
                Ok(QueryStream {
                    inner,
                    lifecycle,
                    sources,
                })
            }
            Err(err) => {
                lifecycle.fail(&err);
                Err(err.into())
            }
        }
    }
}

fn sources(bundle: &ContextBundle) -> Vec<ContextSource> {
    bundle
        .snippets
        .iter()
        .map(|snippet| ContextSource {
            path: snippet.path.clone(),
            start_line: snippet.start_line,
            end_line: snippet.end_line,
            score: snippet.score,
        })
        .collect()
}

/// Routed stream that keeps the query lifecycle current.
/// Dropping it before the terminal event records a cancellation.
pub struct QueryStream {
    inner: ResponseStream,
    lifecycle: QueryLifecycle,
    sources: Vec<ContextSource>,
}

impl QueryStream {
    pub fn request_id(&self) -> &str {
        self.lifecycle.request_id()
    }

    pub const fn state(&self) -> QueryState {
        self.lifecycle.state()
    }

    pub fn sources(&self) -> &[ContextSource] {
        &self.sources
    }

    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Delta(_) => {
                if self.lifecycle.state() == QueryState::Dispatched {
                    self.lifecycle.advance(QueryState::Streaming);
                }
            }
            StreamEvent::Completed => {
                self.lifecycle.advance(QueryState::Completed);
            }
            StreamEvent::Failed(err) => {
                self.lifecycle.fail(err);
            }
        }
    }
}

impl Stream for QueryStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(event)) = &polled {
            this.observe(event);
        }
        polled
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        if !self.lifecycle.state().is_terminal() {
            self.lifecycle.fail(&RouterError::Cancelled);
        }
    }
}
