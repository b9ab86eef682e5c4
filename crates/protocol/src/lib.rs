use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod validation;

pub use validation::ValidationError;

pub const ERR_VALIDATION: &str = "VALIDATION_ERR";
pub const ERR_AUTH: &str = "AUTH_ERR";
pub const ERR_PROVIDER: &str = "PROVIDER_ERR";
pub const ERR_TIMEOUT: &str = "TIMEOUT_ERR";
pub const ERR_UNEXPECTED: &str = "UNEXPECTED_ERR";

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Closed set of LLM backends a query may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Azure,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::Azure,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Azure => "azure",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ValidationError::UnknownProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub message: String,
    /// Workspace-relative paths to seed retrieval with.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

/// Source snippet that was included in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSource {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
}

/// Non-streaming response of `POST /query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub text: String,
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub sources: Vec<ContextSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub msg: String,
}

/// `{"error": {"code": ..., "msg": ...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                msg: msg.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub indexed_files: usize,
    pub chunks: usize,
    pub graph_files: usize,
    pub graph_functions: usize,
    pub degraded_files: usize,
    pub unindexable_files: usize,
    pub pending_jobs: usize,
    #[serde(default)]
    pub indexing: IndexingCounters,
}

/// Counters accumulated by the indexing pipeline since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingCounters {
    pub files_indexed: usize,
    pub files_deleted: usize,
    pub files_degraded: usize,
    pub chunks_embedded: usize,
    pub chunks_reused: usize,
    pub parse_failures: usize,
    #[serde(default)]
    pub recent_errors: Vec<String>,
}
