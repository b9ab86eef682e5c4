use async_trait::async_trait;
use codechat_llm::{
    CompletionRequest, DeltaStream, LlmRouter, ProviderAdapter, ProviderError, ProviderRegistry,
    RetryPolicy, RouterConfig, RouterError, StreamEvent,
};
use codechat_protocol::{ChatMessage, ProviderKind};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Step {
    Fail(ProviderError),
    Reply(Vec<&'static str>),
    ReplyThenFail(Vec<&'static str>, ProviderError),
    Hang,
    /// Emit deltas, then stall; the flag flips when the stream is dropped
    ReplyThenStall(Vec<&'static str>, Arc<AtomicBool>),
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct ScriptedAdapter {
    kind: ProviderKind,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(kind: ProviderKind, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Step::Fail(ProviderError::Transient("script exhausted".into())))
    }
}

fn deltas(parts: Vec<&'static str>) -> impl futures::Stream<Item = Result<String, ProviderError>> {
    futures::stream::iter(parts.into_iter().map(|p| Ok(p.to_string())))
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
        match self.next_step() {
            Step::Fail(err) | Step::ReplyThenFail(_, err) => Err(err),
            Step::Reply(parts) => Ok(parts.concat()),
            Step::Hang | Step::ReplyThenStall(..) => futures::future::pending().await,
        }
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        match self.next_step() {
            Step::Fail(err) => Err(err),
            Step::Reply(parts) => Ok(deltas(parts).boxed()),
            Step::ReplyThenFail(parts, err) => {
                Ok(deltas(parts).chain(futures::stream::once(async { Err(err) })).boxed())
            }
            Step::Hang => Ok(futures::stream::pending().boxed()),
            Step::ReplyThenStall(parts, flag) => {
                let guard = DropFlag(flag);
                Ok(deltas(parts)
                    .chain(futures::stream::pending())
                    .map(move |item| {
                        let _alive = &guard;
                        item
                    })
                    .boxed())
            }
        }
    }
}

fn config() -> RouterConfig {
    RouterConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
        },
        request_timeout: Duration::from_secs(1),
        stream_idle_timeout: Duration::from_secs(1),
        ..RouterConfig::default()
    }
}

fn router(adapter: &Arc<ScriptedAdapter>) -> LlmRouter {
    let registry = ProviderRegistry::new().with_adapter(adapter.clone());
    LlmRouter::new(registry, config())
}

fn request() -> CompletionRequest {
    CompletionRequest::new("model", vec![ChatMessage::user("hello")])
}

fn transient(msg: &str) -> ProviderError {
    ProviderError::Transient(msg.to_string())
}

#[tokio::test(start_paused = true)]
async fn transient_failures_then_success_stream_without_duplicates() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::OpenAi,
        vec![
            Step::Fail(transient("502")),
            Step::Fail(ProviderError::RateLimited("429".into())),
            Step::Reply(vec!["Hel", "lo", " world"]),
        ],
    );
    let stream = router(&adapter).stream(ProviderKind::OpenAi, request()).unwrap();
    let events: Vec<StreamEvent> = stream.collect().await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Delta("Hel".into()),
            StreamEvent::Delta("lo".into()),
            StreamEvent::Delta(" world".into()),
            StreamEvent::Completed,
        ]
    );
    assert_eq!(adapter.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn complete_retries_then_returns_answer() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::Google,
        vec![
            Step::Fail(transient("503")),
            Step::Fail(transient("503")),
            Step::Reply(vec!["the ", "answer"]),
        ],
    );
    let text = router(&adapter)
        .complete(ProviderKind::Google, &request())
        .await
        .unwrap();
    assert_eq!(text, "the answer");
    assert_eq!(adapter.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn failure_after_partial_output_is_terminal() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::Anthropic,
        vec![
            Step::ReplyThenFail(vec!["par"], transient("connection reset")),
            Step::Reply(vec!["full answer"]),
        ],
    );
    let stream = router(&adapter)
        .stream(ProviderKind::Anthropic, request())
        .unwrap();
    let events: Vec<StreamEvent> = stream.collect().await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Delta("par".into()),
            StreamEvent::Failed(RouterError::Transient {
                attempts: 1,
                message: "connection reset".into()
            }),
        ]
    );
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn auth_errors_are_not_retried() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::OpenAi,
        vec![
            Step::Fail(ProviderError::Auth("bad key".into())),
            Step::Reply(vec!["unreachable"]),
        ],
    );
    let router = router(&adapter);

    let err = router
        .stream(ProviderKind::OpenAi, request())
        .unwrap()
        .into_text()
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Auth("bad key".into()));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_fail_as_validation() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::OpenAi,
        vec![Step::Fail(ProviderError::InvalidRequest("unknown model".into()))],
    );
    let err = router(&adapter)
        .complete(ProviderKind::OpenAi, &request())
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Validation("unknown model".into()));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_is_bounded() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::Azure,
        (0..10).map(|_| Step::Fail(transient("500"))).collect(),
    );
    let err = router(&adapter)
        .complete(ProviderKind::Azure, &request())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RouterError::Transient {
            attempts: 4,
            message: "500".into()
        }
    );
    assert_eq!(adapter.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn silent_streams_time_out() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::OpenAi,
        (0..4).map(|_| Step::Hang).collect(),
    );
    let err = router(&adapter)
        .stream(ProviderKind::OpenAi, request())
        .unwrap()
        .into_text()
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::Timeout(Duration::from_secs(1)));
    assert_eq!(adapter.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn hung_completion_times_out() {
    let adapter = ScriptedAdapter::new(
        ProviderKind::OpenAi,
        vec![Step::Hang, Step::Reply(vec!["late but fine"])],
    );
    let text = router(&adapter)
        .complete(ProviderKind::OpenAi, &request())
        .await
        .unwrap();
    assert_eq!(text, "late but fine");
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn dropping_the_stream_aborts_the_provider_call() {
    let dropped = Arc::new(AtomicBool::new(false));
    let adapter = ScriptedAdapter::new(
        ProviderKind::OpenAi,
        vec![Step::ReplyThenStall(vec!["first"], dropped.clone())],
    );
    let router = router(&adapter);
    let mut stream = router.stream(ProviderKind::OpenAi, request()).unwrap();

    assert_eq!(
        stream.next_event().await,
        Some(StreamEvent::Delta("first".into()))
    );
    assert!(!dropped.load(Ordering::SeqCst));
    drop(stream);

    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn unconfigured_provider_is_rejected_up_front() {
    let adapter = ScriptedAdapter::new(ProviderKind::OpenAi, vec![]);
    let router = router(&adapter);

    assert_eq!(
        router.ensure_configured(ProviderKind::Anthropic),
        Err(RouterError::ProviderNotConfigured(ProviderKind::Anthropic))
    );
    assert!(matches!(
        router.stream(ProviderKind::Anthropic, request()),
        Err(RouterError::ProviderNotConfigured(ProviderKind::Anthropic))
    ));
    assert_eq!(adapter.calls(), 0);
}
