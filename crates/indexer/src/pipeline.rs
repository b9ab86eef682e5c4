use crate::config::PipelineConfig;
use crate::indexer::{IndexOutcome, Indexer};
use crate::scanner::FileScanner;
use crate::watcher::ChangeEvent;
use crate::{IndexerError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

/// Observable pipeline load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatus {
    /// Jobs running, waiting for a worker, queued behind a running job for
    /// the same path, or waiting out a retry delay
    pub pending_jobs: usize,
}

impl PipelineStatus {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.pending_jobs == 0
    }
}

#[derive(Debug, Clone)]
struct Job {
    event: ChangeEvent,
    attempt: u32,
}

enum Completion {
    Done,
    Retry { delay: Duration },
}

enum Command {
    Shutdown,
}

/// Consumes debounced change events and indexes them on a bounded pool.
///
/// Work for different paths runs in parallel up to `workers`; work for the
/// same path is serialized, with at most one follow-up job kept per path
/// (the latest event wins). Failed jobs are requeued with exponential
/// backoff. State is persisted once the queue has been idle for
/// `persist_interval` and again on shutdown.
pub struct IndexingPipeline {
    command_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<PipelineStatus>,
    task: JoinHandle<()>,
}

impl IndexingPipeline {
    pub fn start(
        indexer: Arc<Indexer>,
        config: PipelineConfig,
        events: mpsc::Receiver<ChangeEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(PipelineStatus::default());
        let dispatcher = Dispatcher::new(indexer, config, status_tx);
        let task = tokio::spawn(dispatcher.run(events, command_rx));
        Self {
            command_tx,
            status_rx,
            task,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status_rx.borrow()
    }

    /// Receiver that observes every status change
    pub fn status_stream(&self) -> watch::Receiver<PipelineStatus> {
        self.status_rx.clone()
    }

    /// Resolve once no job is pending
    pub async fn wait_idle(&self) {
        let mut rx = self.status_rx.clone();
        let _ = rx.wait_for(PipelineStatus::is_idle).await;
    }

    /// Finish in-flight jobs, drop scheduled retries, persist, and stop
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(Command::Shutdown).await;
        if let Err(err) = self.task.await {
            log::error!("Indexing pipeline task failed: {err}");
        }
    }

    /// Wait for the dispatcher to exit on its own, which happens once the
    /// event channel is closed and all work, retries included, is done
    pub async fn join(self) {
        // dropping the command sender would read as a shutdown request
        let Self {
            command_tx, task, ..
        } = self;
        if let Err(err) = task.await {
            log::error!("Indexing pipeline task failed: {err}");
        }
        drop(command_tx);
    }
}

struct Dispatcher {
    indexer: Arc<Indexer>,
    config: PipelineConfig,
    workers: Arc<Semaphore>,
    status_tx: watch::Sender<PipelineStatus>,
    running: HashSet<String>,
    /// Follow-up job per running path
    rerun: HashMap<String, Job>,
    /// Paths waiting out a retry delay, with the attempt to run next
    delayed: HashMap<String, u32>,
    dirty: bool,
}

impl Dispatcher {
    fn new(
        indexer: Arc<Indexer>,
        config: PipelineConfig,
        status_tx: watch::Sender<PipelineStatus>,
    ) -> Self {
        Self {
            indexer,
            workers: Arc::new(Semaphore::new(config.workers.max(1))),
            config,
            status_tx,
            running: HashSet::new(),
            rerun: HashMap::new(),
            delayed: HashMap::new(),
            dirty: false,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<ChangeEvent>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(Job, Completion)>();
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<Job>();
        let mut events_open = true;
        let mut shutting_down = false;

        loop {
            if shutting_down && self.running.is_empty() && self.rerun.is_empty() {
                break;
            }
            if !events_open && self.pending() == 0 {
                break;
            }

            let settle = tokio::time::sleep(self.config.persist_interval);
            tokio::pin!(settle);

            tokio::select! {
                event = events.recv(), if events_open && !shutting_down => match event {
                    Some(event) => self.submit(Job { event, attempt: 0 }, &done_tx),
                    None => events_open = false,
                },
                Some((job, completion)) = done_rx.recv() => {
                    self.complete(job, completion, &done_tx, &retry_tx, shutting_down);
                }
                Some(job) = retry_rx.recv(), if !shutting_down => {
                    let path = job.event.path().to_string();
                    if self.delayed.get(&path) == Some(&job.attempt) {
                        self.delayed.remove(&path);
                        self.submit(job, &done_tx);
                    }
                }
                command = commands.recv(), if !shutting_down => {
                    if matches!(command, Some(Command::Shutdown) | None) {
                        log::info!("Indexing pipeline shutting down");
                        shutting_down = true;
                        self.delayed.clear();
                    }
                }
                () = &mut settle, if self.dirty && self.pending() == 0 => {
                    self.persist().await;
                }
            }
            self.publish();
        }

        if self.dirty {
            self.persist().await;
        }
        self.publish();
    }

    /// Start `job` now, or park it behind the running job for the same path
    fn submit(&mut self, job: Job, done_tx: &mpsc::UnboundedSender<(Job, Completion)>) {
        let path = job.event.path().to_string();
        // a fresh event supersedes a scheduled retry
        if job.attempt == 0 {
            self.delayed.remove(&path);
        }
        if self.running.contains(&path) {
            self.rerun.insert(path, job);
            return;
        }
        self.running.insert(path);
        self.spawn(job, done_tx.clone());
    }

    fn complete(
        &mut self,
        job: Job,
        completion: Completion,
        done_tx: &mpsc::UnboundedSender<(Job, Completion)>,
        retry_tx: &mpsc::UnboundedSender<Job>,
        shutting_down: bool,
    ) {
        let path = job.event.path().to_string();
        self.running.remove(&path);
        self.dirty = true;

        if let Some(next) = self.rerun.remove(&path) {
            self.submit(next, done_tx);
            return;
        }
        if let Completion::Retry { delay } = completion {
            if shutting_down {
                return;
            }
            let next = Job {
                event: job.event,
                attempt: job.attempt + 1,
            };
            self.delayed.insert(path, next.attempt);
            let retry_tx = retry_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = retry_tx.send(next);
            });
        }
    }

    fn spawn(&self, job: Job, done_tx: mpsc::UnboundedSender<(Job, Completion)>) {
        let indexer = Arc::clone(&self.indexer);
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let completion = match workers.acquire_owned().await {
                Ok(_permit) => process(&indexer, &job).await,
                Err(_) => Completion::Done,
            };
            let _ = done_tx.send((job, completion));
        });
    }

    fn pending(&self) -> usize {
        self.running.len() + self.rerun.len() + self.delayed.len()
    }

    fn publish(&self) {
        let status = PipelineStatus {
            pending_jobs: self.pending(),
        };
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    async fn persist(&mut self) {
        match self.indexer.persist().await {
            Ok(()) => self.dirty = false,
            Err(err) => log::warn!("Failed to persist index state: {err}"),
        }
    }
}

/// Scan the workspace, forget files deleted while the daemon was down, and
/// enqueue every present file. Unchanged files cost one hash comparison.
pub async fn initial_scan(indexer: &Indexer, events: &mpsc::Sender<ChangeEvent>) -> Result<usize> {
    let root = indexer.root().to_path_buf();
    let files = tokio::task::spawn_blocking(move || FileScanner::new(root).scan())
        .await
        .map_err(|e| IndexerError::Other(format!("scan task failed: {e}")))?;

    let removed = indexer.reconcile(&files);
    if !removed.is_empty() {
        log::info!("{} tracked file(s) disappeared since last run", removed.len());
    }

    let count = files.len();
    for path in files {
        events
            .send(ChangeEvent::Changed(path))
            .await
            .map_err(|_| IndexerError::Other("indexing pipeline stopped".to_string()))?;
    }
    Ok(count)
}

async fn process(indexer: &Indexer, job: &Job) -> Completion {
    let path = job.event.path();
    if job.event.is_delete() {
        indexer.remove_path(path);
        return Completion::Done;
    }

    let config = indexer.config();
    match indexer.index_file(path).await {
        Ok(IndexOutcome::ParseFailed { failures }) => {
            log::debug!("Parse of {path} failed {failures} time(s); requeueing");
            Completion::Retry {
                delay: config.backoff(job.attempt),
            }
        }
        Ok(_) => Completion::Done,
        Err(IndexerError::EmbeddingFailure { message, .. }) => {
            if job.attempt < config.max_embed_retries {
                let delay = config.backoff(job.attempt);
                log::info!(
                    "Embedding {path} failed (attempt {}): {message}; retrying in {delay:?}",
                    job.attempt + 1
                );
                Completion::Retry { delay }
            } else {
                if let Err(err) = indexer.mark_degraded(path).await {
                    log::warn!("Failed to mark {path} degraded: {err}");
                }
                Completion::Done
            }
        }
        Err(err) => {
            log::warn!("Failed to index {path}: {err}");
            Completion::Done
        }
    }
}
