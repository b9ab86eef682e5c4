use crate::config::DaemonConfig;
use crate::http_api;
use crate::service::QueryService;
use anyhow::{Context, Result};
use codechat_indexer::{
    initial_scan, ChangeWatcher, IndexSummary, Indexer, IndexingPipeline, StartupReport,
};
use codechat_llm::{LlmRouter, ProviderRegistry};
use codechat_search::ContextAssembler;
use codechat_vector_store::{build_embedder, CachePaths};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Canonical workspace root; the cache key depends on it
pub fn resolve_root(root: &Path) -> Result<PathBuf> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Workspace root {} is not accessible", root.display()))?;
    anyhow::ensure!(root.is_dir(), "Workspace root {} is not a directory", root.display());
    Ok(root)
}

/// Load persisted state for `root` and build its indexer
pub async fn open_indexer(root: &Path, config: &DaemonConfig) -> Result<Arc<Indexer>> {
    let cache = CachePaths::for_workspace(&config.cache_root(), root);
    log::info!("Cache directory: {}", cache.dir().display());
    let embedder = build_embedder(&config.embedding).context("Failed to set up embeddings")?;
    let (indexer, report) = Indexer::open(root, cache, embedder, config.indexer_config())
        .await
        .context("Failed to open workspace index")?;
    log_startup(&report);
    Ok(Arc::new(indexer))
}

fn log_startup(report: &StartupReport) {
    log::info!(
        "Startup: vectors {:?}, records {:?}, graph {}",
        report.vectors,
        report.records,
        if report.graph_restored { "restored" } else { "empty" }
    );
}

/// Running indexer, watcher and query service for one workspace
pub struct Daemon {
    service: Arc<QueryService>,
    pipeline: IndexingPipeline,
    watcher: ChangeWatcher,
    scan: JoinHandle<()>,
}

impl Daemon {
    pub async fn start(root: &Path, config: &DaemonConfig) -> Result<Self> {
        let root = resolve_root(root)?;
        let indexer = open_indexer(&root, config).await?;

        let (tx, rx) = mpsc::channel(config.watcher.channel_capacity);
        let pipeline = IndexingPipeline::start(indexer.clone(), config.pipeline_config(), rx);
        let watcher = ChangeWatcher::start(&root, config.watcher_config(), tx.clone())
            .context("Failed to watch workspace")?;

        let scan = {
            let indexer = indexer.clone();
            tokio::spawn(async move {
                match initial_scan(&indexer, &tx).await {
                    Ok(count) => log::info!("Initial scan queued {count} file(s)"),
                    Err(err) => log::error!("Initial scan failed: {err}"),
                }
            })
        };

        let registry = ProviderRegistry::from_settings(config.providers.iter());
        let configured: Vec<String> = registry
            .configured()
            .iter()
            .map(ToString::to_string)
            .collect();
        if configured.is_empty() {
            log::warn!("No LLM provider is configured; /query will reject every request");
        } else {
            log::info!("LLM providers: {}", configured.join(", "));
        }
        let router = LlmRouter::new(registry, config.router_config());
        let assembler = ContextAssembler::new(indexer.clone(), config.assembler_config());
        let service = QueryService::new(indexer, assembler, router)
            .with_pipeline_status(pipeline.status_stream())
            .with_request_timeout(config.request_timeout());

        Ok(Self {
            service: Arc::new(service),
            pipeline,
            watcher,
            scan,
        })
    }

    pub fn service(&self) -> Arc<QueryService> {
        Arc::clone(&self.service)
    }

    /// Stop watching, finish in-flight indexing jobs and persist
    pub async fn shutdown(self) {
        let Self {
            pipeline,
            watcher,
            scan,
            ..
        } = self;
        drop(watcher);
        scan.abort();
        pipeline.shutdown().await;
        log::info!("Daemon stopped");
    }
}

/// Bring the index for `root` up to date once, without watching
pub async fn index_once(root: &Path, config: &DaemonConfig) -> Result<IndexSummary> {
    let root = resolve_root(root)?;
    let indexer = open_indexer(&root, config).await?;

    let (tx, rx) = mpsc::channel(config.watcher.channel_capacity);
    let pipeline = IndexingPipeline::start(indexer.clone(), config.pipeline_config(), rx);
    let queued = initial_scan(&indexer, &tx).await;
    drop(tx);
    pipeline.join().await;
    let queued = queued.context("Workspace scan failed")?;
    log::info!("Indexed {queued} file(s) from {}", root.display());
    Ok(indexer.summary())
}

/// Run the daemon until Ctrl-C
pub async fn serve(root: &Path, config: &DaemonConfig) -> Result<()> {
    let daemon = Daemon::start(root, config).await?;
    let app = http_api::router(daemon.service());

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    let local_addr = listener.local_addr()?;
    print_stdout(&format!("Serving CodeChat API: http://{local_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    daemon.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}

pub fn print_stdout(line: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}
