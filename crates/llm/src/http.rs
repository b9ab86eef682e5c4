use crate::error::ProviderError;
use crate::provider::{CompletionRequest, DeltaStream, ProviderAdapter, ProviderRegistry};
use async_trait::async_trait;
use codechat_protocol::ProviderKind;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials and endpoint overrides for one provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// API root; for Azure this is the resource endpoint and is required
    pub base_url: Option<String>,

    /// Azure `api-version` query parameter
    pub api_version: Option<String>,

    /// Azure deployment name; the request model is used when unset
    pub deployment: Option<String>,
}

impl ProviderSettings {
    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        match kind {
            ProviderKind::Azure => has_key && self.base_url.is_some(),
            _ => has_key,
        }
    }
}

/// Wire format spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `/chat/completions`, used by OpenAI, Azure OpenAI and Google's
    /// OpenAI-compatible endpoint
    OpenAiChat,
    /// Anthropic `/messages`
    AnthropicMessages,
}

impl Dialect {
    pub const fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Anthropic => Self::AnthropicMessages,
            ProviderKind::OpenAi | ProviderKind::Google | ProviderKind::Azure => Self::OpenAiChat,
        }
    }

    fn parse_event(self, event: &SseEvent) -> Result<SseOutcome, ProviderError> {
        match self {
            Self::OpenAiChat => parse_openai_event(event),
            Self::AnthropicMessages => parse_anthropic_event(event),
        }
    }
}

const fn default_base_url(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "https://api.openai.com/v1",
        ProviderKind::Anthropic => "https://api.anthropic.com/v1",
        ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
        ProviderKind::Azure => "",
    }
}

/// HTTP adapter for any provider in the closed set
pub struct HttpChatAdapter {
    kind: ProviderKind,
    dialect: Dialect,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
    deployment: Option<String>,
}

impl HttpChatAdapter {
    /// Fails with `InvalidRequest` when the settings lack a key (or, for
    /// Azure, an endpoint). No overall client timeout is set: the router
    /// bounds each attempt.
    pub fn new(kind: ProviderKind, settings: &ProviderSettings) -> Result<Self, ProviderError> {
        if !settings.is_configured(kind) {
            return Err(ProviderError::InvalidRequest(format!(
                "provider {kind} is missing credentials"
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transient(format!("HTTP client: {e}")))?;
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(kind).to_string());

        Ok(Self {
            kind,
            dialect: Dialect::for_provider(kind),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            api_version: settings
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            deployment: settings.deployment.clone(),
        })
    }

    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn url(&self, model: &str) -> String {
        match (self.kind, self.dialect) {
            (ProviderKind::Azure, _) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url,
                self.deployment.as_deref().unwrap_or(model),
                self.api_version
            ),
            (_, Dialect::OpenAiChat) => format!("{}/chat/completions", self.base_url),
            (_, Dialect::AnthropicMessages) => format!("{}/messages", self.base_url),
        }
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        match self.dialect {
            Dialect::OpenAiChat => json!({
                "model": request.model,
                "messages": request.messages,
                "stream": stream,
            }),
            Dialect::AnthropicMessages => {
                let messages: Vec<_> = request.conversation().collect();
                let mut body = json!({
                    "model": request.model,
                    "max_tokens": request.max_tokens,
                    "messages": messages,
                    "stream": stream,
                });
                if let Some(system) = request.system_text() {
                    body["system"] = Value::String(system);
                }
                body
            }
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(self.url(&request.model))
            .json(&self.body(request, stream));
        builder = match self.kind {
            ProviderKind::Azure => builder.header("api-key", &self.api_key),
            ProviderKind::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ProviderKind::OpenAi | ProviderKind::Google => builder.bearer_auth(&self.api_key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("{} request failed: {e}", self.kind)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = ProviderError::from_status(status.as_u16(), error_message(&body));
        log::warn!("{} returned {status}: {error}", self.kind);
        Err(error)
    }
}

#[async_trait]
impl ProviderAdapter for HttpChatAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let response = self.send(request, false).await?;
        let malformed = |e: reqwest::Error| ProviderError::Transient(format!("invalid response: {e}"));
        match self.dialect {
            Dialect::OpenAiChat => {
                let parsed: OpenAiResponse = response.json().await.map_err(malformed)?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message)
                    .and_then(|message| message.content)
                    .ok_or_else(|| ProviderError::Transient("response had no choices".to_string()))
            }
            Dialect::AnthropicMessages => {
                let parsed: AnthropicResponse = response.json().await.map_err(malformed)?;
                Ok(parsed
                    .content
                    .into_iter()
                    .filter(|block| block.kind == "text")
                    .map(|block| block.text)
                    .collect())
            }
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let response = self.send(request, true).await?;
        Ok(sse_deltas(response.bytes_stream(), self.dialect))
    }
}

impl ProviderRegistry {
    /// HTTP adapters for every configured provider; others are skipped
    pub fn from_settings<'a>(
        providers: impl IntoIterator<Item = (ProviderKind, &'a ProviderSettings)>,
    ) -> Self {
        let mut registry = Self::new();
        for (kind, settings) in providers {
            if !settings.is_configured(kind) {
                log::debug!("Provider {kind} has no credentials; skipping");
                continue;
            }
            match HttpChatAdapter::new(kind, settings) {
                Ok(adapter) => registry.register(Arc::new(adapter)),
                Err(err) => log::warn!("Provider {kind} unavailable: {err}"),
            }
        }
        registry
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiContent>,
    delta: Option<OpenAiContent>,
}

#[derive(Deserialize)]
struct OpenAiContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    ContentBlockDelta { delta: AnthropicDelta },
    MessageStop,
    Error { error: ApiErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

/// Provider error message from a JSON error body, or the raw body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => body.chars().take(512).collect(),
    }
}

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder; input may split events and
/// UTF-8 sequences at arbitrary byte boundaries
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(bytes.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..end])) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

enum SseOutcome {
    Delta(String),
    Done,
    Skip,
}

fn parse_openai_event(event: &SseEvent) -> Result<SseOutcome, ProviderError> {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Ok(SseOutcome::Done);
    }
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(data) {
        return Err(ProviderError::Transient(envelope.error.message));
    }
    let chunk: OpenAiResponse = serde_json::from_str(data)
        .map_err(|e| ProviderError::Transient(format!("malformed stream event: {e}")))?;
    let delta = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();
    if delta.is_empty() {
        Ok(SseOutcome::Skip)
    } else {
        Ok(SseOutcome::Delta(delta))
    }
}

fn parse_anthropic_event(event: &SseEvent) -> Result<SseOutcome, ProviderError> {
    let parsed: AnthropicEvent = serde_json::from_str(&event.data).map_err(|e| {
        ProviderError::Transient(format!("malformed stream event: {e}"))
    })?;
    match parsed {
        AnthropicEvent::ContentBlockDelta { delta } => Ok(delta
            .text
            .filter(|text| !text.is_empty())
            .map_or(SseOutcome::Skip, SseOutcome::Delta)),
        AnthropicEvent::MessageStop => Ok(SseOutcome::Done),
        AnthropicEvent::Error { error } => Err(classify_stream_error(&error)),
        AnthropicEvent::Other => Ok(SseOutcome::Skip),
    }
}

fn classify_stream_error(error: &ApiErrorBody) -> ProviderError {
    let message = error.message.clone();
    match error.kind.as_deref() {
        Some("authentication_error" | "permission_error") => ProviderError::Auth(message),
        Some("rate_limit_error") => ProviderError::RateLimited(message),
        Some("invalid_request_error" | "not_found_error") => ProviderError::InvalidRequest(message),
        _ => ProviderError::Transient(message),
    }
}

struct SseState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    queued: VecDeque<Result<String, ProviderError>>,
    finished: bool,
}

impl<S> SseState<S> {
    fn absorb(&mut self, bytes: &[u8], dialect: Dialect) {
        for event in self.decoder.push(bytes) {
            match dialect.parse_event(&event) {
                Ok(SseOutcome::Delta(text)) => self.queued.push_back(Ok(text)),
                Ok(SseOutcome::Skip) => {}
                Ok(SseOutcome::Done) => {
                    self.finished = true;
                    return;
                }
                Err(err) => {
                    self.queued.push_back(Err(err));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Turn a raw SSE body into text deltas in `dialect`'s event format.
///
/// The stream ends after the provider's completion marker, after the first
/// error, or when the body ends.
pub fn sse_deltas<S, B, E>(body: S, dialect: Dialect) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        queued: VecDeque::new(),
        finished: false,
    };
    Box::pin(futures::stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(item) = state.queued.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.absorb(bytes.as_ref(), dialect),
                Some(Err(err)) => {
                    state.finished = true;
                    state
                        .queued
                        .push_back(Err(ProviderError::Transient(format!("stream interrupted: {err}"))));
                }
                None => state.finished = true,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codechat_protocol::ChatMessage;
    use pretty_assertions::assert_eq;

    fn settings(key: &str, base_url: Option<&str>) -> ProviderSettings {
        ProviderSettings {
            api_key: Some(key.to_string()),
            base_url: base_url.map(str::to_string),
            ..ProviderSettings::default()
        }
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> {
        let owned: Vec<Result<Vec<u8>, std::io::Error>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures::stream::iter(owned)
    }

    async fn collect(stream: DeltaStream) -> Vec<Result<String, ProviderError>> {
        stream.collect().await
    }

    #[test]
    fn decoder_handles_split_events_and_crlf() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: ping\r\nda").is_empty());
        let events = decoder.push(b"ta: {}\r\n\r\n: comment\n\ndata: a\ndata: b\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: Some("ping".into()),
                    data: "{}".into()
                },
                SseEvent {
                    event: None,
                    data: "a\nb".into()
                },
            ]
        );
    }

    #[test]
    fn decoder_keeps_multibyte_chars_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let events = decoder.push(&bytes[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[tokio::test]
    async fn openai_stream_yields_deltas_until_done() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"de",
            "lta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);
        let deltas = collect(sse_deltas(body, Dialect::OpenAiChat)).await;
        assert_eq!(deltas, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn anthropic_stream_maps_error_events() {
        let body = chunks(&[
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        ]);
        let deltas = collect(sse_deltas(body, Dialect::AnthropicMessages)).await;
        assert_eq!(
            deltas,
            vec![
                Ok("Hi".to_string()),
                Err(ProviderError::Transient("Overloaded".to_string()))
            ]
        );
    }

    #[tokio::test]
    async fn broken_body_is_transient() {
        let body = futures::stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Err(std::io::Error::other("reset")),
        ]);
        let deltas = collect(sse_deltas(body, Dialect::OpenAiChat)).await;
        assert_eq!(deltas.len(), 2);
        assert!(matches!(&deltas[1], Err(ProviderError::Transient(msg)) if msg.contains("reset")));
    }

    #[test]
    fn anthropic_body_moves_system_messages_out() {
        let adapter = HttpChatAdapter::new(ProviderKind::Anthropic, &settings("k", None)).unwrap();
        let request = CompletionRequest::new(
            "claude-3-5-sonnet",
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        );
        assert_eq!(
            adapter.body(&request, true),
            json!({
                "model": "claude-3-5-sonnet",
                "max_tokens": 1024,
                "system": "be brief",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
            })
        );
        assert_eq!(adapter.url("claude-3-5-sonnet"), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn azure_needs_an_endpoint_and_routes_by_deployment() {
        assert!(!settings("k", None).is_configured(ProviderKind::Azure));
        assert!(HttpChatAdapter::new(ProviderKind::Azure, &settings("k", None)).is_err());

        let adapter = HttpChatAdapter::new(
            ProviderKind::Azure,
            &settings("k", Some("https://example.openai.azure.com/")),
        )
        .unwrap();
        assert_eq!(
            adapter.url("gpt-4o"),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn registry_skips_providers_without_keys() {
        let openai = settings("sk", None);
        let google = ProviderSettings::default();
        let registry = ProviderRegistry::from_settings([
            (ProviderKind::OpenAi, &openai),
            (ProviderKind::Google, &google),
        ]);
        assert_eq!(registry.configured(), vec![ProviderKind::OpenAi]);
    }

    #[test]
    fn error_message_prefers_json_body() {
        assert_eq!(
            error_message(r#"{"error":{"message":"bad key","type":"invalid_api_key"}}"#),
            "bad key"
        );
        assert_eq!(error_message("gateway timeout"), "gateway timeout");
    }
}
