use anyhow::{Context as AnyhowContext, Result};
use codechat_chunker::ChunkerConfig;
use codechat_indexer::{IndexerConfig, PipelineConfig, WatcherConfig};
use codechat_llm::{ProviderSettings, RetryPolicy, RouterConfig, DEFAULT_SYSTEM_PROMPT};
use codechat_protocol::ProviderKind;
use codechat_search::AssemblerConfig;
use codechat_vector_store::{EmbeddingConfig, EmbeddingMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND: &str = "127.0.0.1:16005";
pub const CONFIG_FILE: &str = "config.toml";

/// Daemon settings: TOML file, then environment overrides, then CLI flags.
/// Every field has a default so an empty file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: Option<String>,
    pub server: ServerSection,
    pub cache: CacheSection,
    pub watcher: WatcherSection,
    pub indexer: IndexerSection,
    pub chunker: ChunkerConfig,
    pub context: ContextSection,
    pub router: RouterSection,
    pub embedding: EmbeddingConfig,
    pub providers: ProvidersSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,

    /// Upper bound on a non-streaming query, context assembly included
    pub request_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            request_timeout_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Parent of the per-workspace cache directories
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSection {
    pub debounce_ms: u64,
    pub max_wait_ms: u64,
    pub ignore: Vec<String>,

    /// Debounced events buffered ahead of the indexing pipeline
    pub channel_capacity: usize,
}

impl Default for WatcherSection {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            max_wait_ms: 3_000,
            ignore: Vec::new(),
            channel_capacity: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSection {
    pub workers: usize,
    pub embed_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_parse_failures: u32,
    pub persist_interval_ms: u64,
    pub embed_batch_size: usize,
}

impl Default for IndexerSection {
    fn default() -> Self {
        let indexer = IndexerConfig::default();
        let pipeline = PipelineConfig::default();
        Self {
            workers: pipeline.workers,
            embed_retries: indexer.max_embed_retries,
            retry_backoff_ms: millis(indexer.retry_backoff),
            max_parse_failures: indexer.max_parse_failures,
            persist_interval_ms: millis(pipeline.persist_interval),
            embed_batch_size: indexer.embed_batch_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub top_k: usize,
    pub token_budget: usize,
    pub similarity_weight: f32,
    pub graph_bonus: f32,
    pub neighbor_chunks: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        let defaults = AssemblerConfig::default();
        Self {
            top_k: defaults.top_k,
            token_budget: defaults.token_budget,
            similarity_weight: defaults.similarity_weight,
            graph_bonus: defaults.graph_bonus,
            neighbor_chunks: defaults.neighbor_chunks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub stream_idle_timeout_ms: u64,
    pub system_prompt: String,
}

impl Default for RouterSection {
    fn default() -> Self {
        let defaults = RouterConfig::default();
        Self {
            max_retries: defaults.retry.max_retries,
            base_backoff_ms: millis(defaults.retry.base_backoff),
            max_backoff_ms: millis(defaults.retry.max_backoff),
            request_timeout_ms: millis(defaults.request_timeout),
            stream_idle_timeout_ms: millis(defaults.stream_idle_timeout),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub google: ProviderSettings,
    pub azure: ProviderSettings,
}

impl ProvidersSection {
    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &ProviderSettings)> {
        [
            (ProviderKind::OpenAi, &self.openai),
            (ProviderKind::Anthropic, &self.anthropic),
            (ProviderKind::Google, &self.google),
            (ProviderKind::Azure, &self.azure),
        ]
        .into_iter()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl DaemonConfig {
    /// `$XDG_CONFIG_HOME/codechat/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("codechat").join(CONFIG_FILE))
    }

    /// Load `explicit` (which must exist) or the default file when present,
    /// then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|path| path.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `CODECHAT_*` and provider key variables; blank values are ignored
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(bind) = var("CODECHAT_BIND") {
            self.server.bind = bind;
        }
        if let Some(dir) = var("CODECHAT_CACHE_DIR") {
            self.cache.root = Some(PathBuf::from(dir));
        }
        if let Some(level) = var("CODECHAT_LOG_LEVEL") {
            self.log_level = Some(level);
        }
        if let Some(mode) = var("CODECHAT_EMBEDDING_MODE") {
            self.embedding.mode = mode
                .parse::<EmbeddingMode>()
                .context("Invalid CODECHAT_EMBEDDING_MODE")?;
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(key.clone());
            }
            self.providers.openai.api_key = Some(key);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.providers.anthropic.api_key = Some(key);
        }
        if let Some(key) = var("GOOGLE_API_KEY") {
            self.providers.google.api_key = Some(key);
        }
        if let Some(key) = var("AZURE_OPENAI_API_KEY") {
            self.providers.azure.api_key = Some(key);
        }
        if let Some(endpoint) = var("AZURE_OPENAI_ENDPOINT") {
            self.providers.azure.base_url = Some(endpoint);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.server.bind.trim().is_empty(), "server.bind must not be empty");
        anyhow::ensure!(self.indexer.workers > 0, "indexer.workers must be > 0");
        anyhow::ensure!(
            self.watcher.channel_capacity > 0,
            "watcher.channel_capacity must be > 0"
        );
        anyhow::ensure!(self.embedding.dimension > 0, "embedding.dimension must be > 0");
        self.chunker.validate().context("Invalid [chunker] section")?;
        Ok(())
    }

    /// Configured cache root, else the user cache dir, else `.codechat-cache`
    pub fn cache_root(&self) -> PathBuf {
        self.cache
            .root
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("codechat")))
            .unwrap_or_else(|| PathBuf::from(".codechat-cache"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            chunker: self.chunker.clone(),
            max_embed_retries: self.indexer.embed_retries,
            retry_backoff: Duration::from_millis(self.indexer.retry_backoff_ms),
            max_parse_failures: self.indexer.max_parse_failures.max(1),
            embed_batch_size: self.indexer.embed_batch_size.max(1),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.indexer.workers,
            persist_interval: Duration::from_millis(self.indexer.persist_interval_ms),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(self.watcher.debounce_ms),
            max_wait: Duration::from_millis(self.watcher.max_wait_ms),
            ignore: self.watcher.ignore.clone(),
        }
    }

    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            top_k: self.context.top_k,
            token_budget: self.context.token_budget,
            similarity_weight: self.context.similarity_weight,
            graph_bonus: self.context.graph_bonus,
            neighbor_chunks: self.context.neighbor_chunks,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            retry: RetryPolicy {
                max_retries: self.router.max_retries,
                base_backoff: Duration::from_millis(self.router.base_backoff_ms),
                max_backoff: Duration::from_millis(self.router.max_backoff_ms),
            },
            request_timeout: Duration::from_millis(self.router.request_timeout_ms),
            stream_idle_timeout: Duration::from_millis(self.router.stream_idle_timeout_ms),
            system_prompt: self.router.system_prompt.clone(),
            ..RouterConfig::default()
        }
    }
}
