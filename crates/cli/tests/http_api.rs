use async_trait::async_trait;
use codechat_daemon::{http_api, QueryService};
use codechat_indexer::{Indexer, IndexerConfig};
use codechat_llm::{
    CompletionRequest, DeltaStream, LlmRouter, ProviderAdapter, ProviderError, ProviderRegistry,
    RetryPolicy, RouterConfig,
};
use codechat_protocol::{
    ErrorEnvelope, HealthReport, ProviderKind, QueryResponse, ERR_AUTH, ERR_PROVIDER,
    ERR_VALIDATION, REQUEST_ID_HEADER,
};
use codechat_search::{AssemblerConfig, ContextAssembler};
use codechat_vector_store::{CachePaths, StubEmbedder};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MAIN: &str = "from util import helper\n\ndef main():\n    helper()\n";
const UTIL: &str = "def helper():\n    return 42\n";

/// Behaviour is picked by a keyword in the user's message
struct KeywordAdapter {
    calls: AtomicUsize,
}

impl KeywordAdapter {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(&self, request: &CompletionRequest) -> Result<Vec<String>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let message = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if message.contains("badkey") {
            return Err(ProviderError::Auth("invalid api key".into()));
        }
        if message.contains("overloaded") {
            return Err(ProviderError::Transient("upstream 503".into()));
        }
        Ok(vec!["main ".into(), "calls\r\n".into(), "helper".into()])
    }
}

#[async_trait]
impl ProviderAdapter for KeywordAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.script(request).map(|parts| parts.concat())
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let parts = self.script(request)?;
        Ok(futures::stream::iter(parts.into_iter().map(Ok)).boxed())
    }
}

struct Harness {
    base: String,
    indexer: Arc<Indexer>,
    adapter: Arc<KeywordAdapter>,
    client: reqwest::Client,
    _tmp: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("main.py"), MAIN).unwrap();
        std::fs::write(root.join("util.py"), UTIL).unwrap();

        let (indexer, _) = Indexer::open(
            &root,
            CachePaths::new(tmp.path().join("cache")),
            Arc::new(StubEmbedder::new(16)),
            IndexerConfig::default(),
        )
        .await
        .unwrap();
        for path in ["main.py", "util.py"] {
            indexer.index_file(path).await.unwrap();
        }
        let indexer = Arc::new(indexer);

        let adapter = Arc::new(KeywordAdapter {
            calls: AtomicUsize::new(0),
        });
        let router = LlmRouter::new(
            ProviderRegistry::new().with_adapter(adapter.clone()),
            RouterConfig {
                retry: RetryPolicy {
                    max_retries: 1,
                    base_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(5),
                },
                request_timeout: Duration::from_secs(5),
                stream_idle_timeout: Duration::from_secs(5),
                ..RouterConfig::default()
            },
        );
        let assembler = ContextAssembler::new(indexer.clone(), AssemblerConfig::default());
        let service = QueryService::new(indexer.clone(), assembler, router);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = http_api::router(Arc::new(service));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            indexer,
            adapter,
            client: reqwest::Client::new(),
            _tmp: tmp,
        }
    }

    async fn query(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/query", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

fn ask(message: &str) -> serde_json::Value {
    json!({"provider": "openai", "model": "gpt-4o", "message": message})
}

#[tokio::test]
async fn health_reports_index_state() {
    let harness = Harness::start().await;
    let response = harness
        .client
        .get(format!("{}/health", harness.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let health: HealthReport = response.json().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.indexed_files, 2);
    assert_eq!(health.graph_files, 2);
    assert!(health.chunks >= 2);
    assert_eq!(health.indexing.files_indexed, 2);
    assert_eq!(health.pending_jobs, 0);
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let harness = Harness::start().await;
    let response = harness.query(json!({"foo": "bar"})).await;
    assert_eq!(response.status(), 422);
    let envelope: ErrorEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.error.code, ERR_VALIDATION);

    let response = harness
        .query(json!({"provider": "mystery", "model": "m", "message": "hi"}))
        .await;
    assert_eq!(response.status(), 422);
    assert_eq!(harness.adapter.calls(), 0);
}

#[tokio::test]
async fn unknown_file_is_rejected_before_any_provider_call() {
    let harness = Harness::start().await;
    let writes = harness.indexer.store().write_count();
    let mutations = harness.indexer.graph().mutation_count();

    let mut body = ask("what is this?");
    body["files"] = json!(["main.py", "nope.py"]);
    let response = harness.query(body).await;

    assert_eq!(response.status(), 422);
    let envelope: ErrorEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.error.code, ERR_VALIDATION);
    assert!(envelope.error.msg.contains("nope.py"));
    assert_eq!(harness.adapter.calls(), 0);
    assert_eq!(harness.indexer.store().write_count(), writes);
    assert_eq!(harness.indexer.graph().mutation_count(), mutations);
}

#[tokio::test]
async fn answers_with_sources_and_echoes_request_id() {
    let harness = Harness::start().await;
    let mut body = ask("what does main do?");
    body["files"] = json!(["main.py"]);
    let response = harness
        .client
        .post(format!("{}/query", harness.base))
        .header(REQUEST_ID_HEADER, "req-42")
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    let answer: QueryResponse = response.json().await.unwrap();
    assert_eq!(answer.text, "main calls\r\nhelper");
    assert_eq!(answer.provider, ProviderKind::OpenAi);
    assert_eq!(answer.model, "gpt-4o");
    assert_eq!(answer.sources[0].path, "main.py");
    assert!(answer.sources.iter().any(|s| s.path == "util.py"));
    assert_eq!(harness.adapter.calls(), 1);
}

#[tokio::test]
async fn streams_server_sent_events_until_done() {
    let harness = Harness::start().await;
    let response = harness
        .client
        .post(format!("{}/query?stream=true", harness.base))
        .json(&ask("explain main"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = response.text().await.unwrap();
    assert!(body.contains("data: main \n"));
    assert!(body.contains("data: calls\n"));
    assert!(body.contains("data: helper\n"));
    assert!(body.contains("event: done\ndata: [DONE]"));
    assert!(!body.contains('\r'));
}

#[tokio::test]
async fn stream_flag_in_body_selects_sse() {
    let harness = Harness::start().await;
    let mut body = ask("explain main");
    body["stream"] = json!(true);
    let text = harness.query(body).await.text().await.unwrap();
    assert!(text.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn provider_auth_failure_is_401() {
    let harness = Harness::start().await;
    let response = harness.query(ask("badkey please")).await;
    assert_eq!(response.status(), 401);
    let envelope: ErrorEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.error.code, ERR_AUTH);
    assert_eq!(harness.adapter.calls(), 1);
}

#[tokio::test]
async fn exhausted_retries_are_503() {
    let harness = Harness::start().await;
    let response = harness.query(ask("overloaded")).await;
    assert_eq!(response.status(), 503);
    let envelope: ErrorEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.error.code, ERR_PROVIDER);
    assert_eq!(harness.adapter.calls(), 2);
}

#[tokio::test]
async fn streamed_failure_arrives_as_error_event() {
    let harness = Harness::start().await;
    let response = harness
        .client
        .post(format!("{}/query?stream=1", harness.base))
        .json(&ask("overloaded"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("event: error"));
    assert!(body.contains(ERR_PROVIDER));
    assert!(!body.contains("[DONE]"));
}

#[tokio::test]
async fn unconfigured_provider_is_a_validation_error() {
    let harness = Harness::start().await;
    let response = harness
        .query(json!({"provider": "anthropic", "model": "claude", "message": "hi"}))
        .await;
    assert_eq!(response.status(), 422);
    let envelope: ErrorEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.error.code, ERR_VALIDATION);
    assert!(envelope.error.msg.contains("anthropic"));
    assert_eq!(harness.adapter.calls(), 0);
}
