use crate::scanner::{is_ignored_scope, is_source_file, relative_path};
use crate::{IndexerError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Editor droppings and lock files that never carry source changes
const DEFAULT_IGNORE_GLOBS: &[&str] = &["**/*.swp", "**/*.swx", "**/*~", "**/.#*", "**/*.tmp"];

/// Normalized per-file change, carrying a workspace-relative path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    Changed(String),
    Deleted(String),
}

impl ChangeEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::Changed(path) | Self::Deleted(path) => path,
        }
    }

    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period per path before its event is emitted
    pub debounce: Duration,

    /// Upper bound on how long a continuously touched path is held back
    pub max_wait: Duration,

    /// Extra glob patterns, matched against workspace-relative paths
    pub ignore: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(400),
            max_wait: Duration::from_secs(3),
            ignore: Vec::new(),
        }
    }
}

/// Decides which relative paths never produce events
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    globs: GlobSet,
}

impl IgnoreRules {
    pub fn new<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let patterns = DEFAULT_IGNORE_GLOBS
            .iter()
            .copied()
            .chain(extra.iter().map(AsRef::as_ref));
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| IndexerError::Watcher(format!("invalid ignore glob '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| IndexerError::Watcher(format!("failed to build ignore set: {e}")))?;
        Ok(Self { globs })
    }

    pub fn is_ignored(&self, relative: &str) -> bool {
        is_ignored_scope(relative) || self.globs.is_match(relative)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Changed,
    Deleted,
}

#[derive(Debug)]
struct PendingEntry {
    kind: Pending,
    first_seen: Instant,
    last_seen: Instant,
}

/// Per-path coalescing of raw file events.
///
/// Repeated events for a path collapse into one carrying the latest state,
/// so create-then-delete inside the window becomes `Deleted`. A path is
/// released once it has been quiet for the window, or once `max_wait` has
/// passed since its first event.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    max_wait: Duration,
    pending: HashMap<String, PendingEntry>,
}

impl Debouncer {
    pub fn new(window: Duration, max_wait: Duration) -> Self {
        Self {
            window,
            max_wait: max_wait.max(window),
            pending: HashMap::new(),
        }
    }

    pub fn record(&mut self, event: ChangeEvent, now: Instant) {
        let (path, kind) = match event {
            ChangeEvent::Changed(path) => (path, Pending::Changed),
            ChangeEvent::Deleted(path) => (path, Pending::Deleted),
        };
        self.pending
            .entry(path)
            .and_modify(|entry| {
                entry.kind = kind;
                entry.last_seen = now;
            })
            .or_insert(PendingEntry {
                kind,
                first_seen: now,
                last_seen: now,
            });
    }

    /// Put back an event that could not be delivered. A newer pending event
    /// for the same path wins.
    pub fn restore(&mut self, event: ChangeEvent, now: Instant) {
        if !self.pending.contains_key(event.path()) {
            self.record(event, now);
        }
    }

    /// Events whose path has settled, ordered by path
    pub fn drain_ready(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| self.is_ready(entry, now))
            .map(|(path, _)| path.clone())
            .collect();
        ready.sort();

        ready
            .into_iter()
            .filter_map(|path| {
                let entry = self.pending.remove(&path)?;
                Some(match entry.kind {
                    Pending::Changed => ChangeEvent::Changed(path),
                    Pending::Deleted => ChangeEvent::Deleted(path),
                })
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|entry| (entry.last_seen + self.window).min(entry.first_seen + self.max_wait))
            .min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_ready(&self, entry: &PendingEntry, now: Instant) -> bool {
        now >= entry.last_seen + self.window || now >= entry.first_seen + self.max_wait
    }
}

/// Watches a workspace and feeds debounced events into a bounded channel.
///
/// The notify callback only records into the debouncer and never blocks.
/// When the channel is full, undelivered events go back into the debouncer
/// where further events for the same path coalesce with them.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    pub fn start(
        root: impl AsRef<Path>,
        config: WatcherConfig,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let rules = IgnoreRules::new(&config.ignore)?;
        let debouncer = Arc::new(Mutex::new(Debouncer::new(config.debounce, config.max_wait)));
        let wake = Arc::new(Notify::new());

        let mut watcher = {
            let root = root.clone();
            let debouncer = Arc::clone(&debouncer);
            let wake = Arc::clone(&wake);
            RecommendedWatcher::new(
                move |res: notify::Result<Event>| match res {
                    Ok(event) => {
                        let changes = normalize_event(&root, &rules, &event);
                        if changes.is_empty() {
                            return;
                        }
                        let now = Instant::now();
                        let mut guard = debouncer.lock().unwrap_or_else(PoisonError::into_inner);
                        for change in changes {
                            guard.record(change, now);
                        }
                        drop(guard);
                        wake.notify_one();
                    }
                    Err(err) => log::warn!("File watcher error: {err}"),
                },
                NotifyConfig::default(),
            )
            .map_err(|e| IndexerError::Watcher(format!("watcher init failed: {e}")))?
        };
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| IndexerError::Watcher(format!("failed to watch {}: {e}", root.display())))?;
        log::info!("Watching {}", root.display());

        let task = tokio::spawn(forward_events(debouncer, wake, events, config.debounce));
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn forward_events(
    debouncer: Arc<Mutex<Debouncer>>,
    wake: Arc<Notify>,
    events: mpsc::Sender<ChangeEvent>,
    retry_delay: Duration,
) {
    let lock = || debouncer.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let deadline = lock().next_deadline();
        match deadline {
            None => wake.notified().await,
            Some(deadline) => {
                tokio::select! {
                    () = wake.notified() => {}
                    () = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
        }

        let ready = lock().drain_ready(Instant::now());
        let mut backlog = Vec::new();
        for event in ready {
            if !backlog.is_empty() {
                backlog.push(event);
                continue;
            }
            match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => backlog.push(event),
                Err(TrySendError::Closed(_)) => return,
            }
        }

        if !backlog.is_empty() {
            log::debug!(
                "Indexing queue full; holding {} change(s) for coalescing",
                backlog.len()
            );
            {
                let now = Instant::now();
                let mut guard = lock();
                for event in backlog {
                    guard.restore(event, now);
                }
            }
            tokio::time::sleep(retry_delay).await;
        }
    }
}

/// Map one raw notify event to relative change events, dropping ignored paths
fn normalize_event(root: &Path, rules: &IgnoreRules, event: &Event) -> Vec<ChangeEvent> {
    event
        .paths
        .iter()
        .filter_map(|path| {
            let relative = relative_path(root, path)?;
            if rules.is_ignored(&relative) {
                return None;
            }
            classify(&event.kind, path, relative)
        })
        .collect()
}

fn classify(kind: &EventKind, path: &Path, relative: String) -> Option<ChangeEvent> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Remove(_) => Some(ChangeEvent::Deleted(relative)),
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            if path.is_file() {
                is_source_file(path).then_some(ChangeEvent::Changed(relative))
            } else if path.exists() {
                None
            } else {
                Some(ChangeEvent::Deleted(relative))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    fn debouncer() -> Debouncer {
        Debouncer::new(Duration::from_millis(300), Duration::from_secs(3))
    }

    #[test]
    fn burst_for_one_path_collapses_to_one_event() {
        let base = Instant::now();
        let mut debouncer = debouncer();
        for ms in [0, 50, 100, 150] {
            debouncer.record(ChangeEvent::Changed("a.rs".into()), at(base, ms));
        }

        assert!(debouncer.drain_ready(at(base, 400)).is_empty());
        assert_eq!(
            debouncer.drain_ready(at(base, 450)),
            vec![ChangeEvent::Changed("a.rs".into())]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn create_then_delete_collapses_to_delete() {
        let base = Instant::now();
        let mut debouncer = debouncer();
        debouncer.record(ChangeEvent::Changed("tmp.py".into()), at(base, 0));
        debouncer.record(ChangeEvent::Deleted("tmp.py".into()), at(base, 20));

        assert_eq!(
            debouncer.drain_ready(at(base, 400)),
            vec![ChangeEvent::Deleted("tmp.py".into())]
        );
    }

    #[test]
    fn delete_then_recreate_is_a_change() {
        let base = Instant::now();
        let mut debouncer = debouncer();
        debouncer.record(ChangeEvent::Deleted("a.rs".into()), at(base, 0));
        debouncer.record(ChangeEvent::Changed("a.rs".into()), at(base, 10));

        assert_eq!(
            debouncer.drain_ready(at(base, 400)),
            vec![ChangeEvent::Changed("a.rs".into())]
        );
    }

    #[test]
    fn paths_are_debounced_independently() {
        let base = Instant::now();
        let mut debouncer = debouncer();
        debouncer.record(ChangeEvent::Changed("a.rs".into()), at(base, 0));
        debouncer.record(ChangeEvent::Changed("b.rs".into()), at(base, 200));

        assert_eq!(
            debouncer.drain_ready(at(base, 300)),
            vec![ChangeEvent::Changed("a.rs".into())]
        );
        assert_eq!(debouncer.next_deadline(), Some(at(base, 500)));
        assert_eq!(
            debouncer.drain_ready(at(base, 500)),
            vec![ChangeEvent::Changed("b.rs".into())]
        );
    }

    #[test]
    fn continuous_edits_are_released_after_max_wait() {
        let base = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(300), Duration::from_millis(1000));
        let mut ms = 0;
        while ms <= 1000 {
            debouncer.record(ChangeEvent::Changed("hot.rs".into()), at(base, ms));
            ms += 100;
        }
        assert_eq!(debouncer.drain_ready(at(base, 1000)).len(), 1);
    }

    #[test]
    fn restore_never_overrides_newer_event() {
        let base = Instant::now();
        let mut debouncer = debouncer();
        debouncer.record(ChangeEvent::Deleted("a.rs".into()), at(base, 0));
        debouncer.restore(ChangeEvent::Changed("a.rs".into()), at(base, 10));

        assert_eq!(
            debouncer.drain_ready(at(base, 400)),
            vec![ChangeEvent::Deleted("a.rs".into())]
        );
    }

    #[test]
    fn ignore_rules_cover_scopes_and_globs() {
        let rules = IgnoreRules::new(&["**/generated/**"]).unwrap();
        assert!(rules.is_ignored("node_modules/x/index.js"));
        assert!(rules.is_ignored("src/.main.rs.swp"));
        assert!(rules.is_ignored("src/generated/api.rs"));
        assert!(!rules.is_ignored("src/main.rs"));
        assert!(IgnoreRules::new(&["[unclosed"]).is_err());
    }

    #[test]
    fn notify_events_are_normalized() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("lib.rs"), "fn a() {}").unwrap();
        std::fs::write(root.join("notes.bin"), "x").unwrap();
        let rules = IgnoreRules::new::<&str>(&[]).unwrap();

        let modify = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(root.join("lib.rs"))
            .add_path(root.join("notes.bin"))
            .add_path(root.join("gone.rs"));
        assert_eq!(
            normalize_event(root, &rules, &modify),
            vec![
                ChangeEvent::Changed("lib.rs".into()),
                ChangeEvent::Deleted("gone.rs".into()),
            ]
        );

        let remove = Event::new(EventKind::Remove(notify::event::RemoveKind::Folder))
            .add_path(root.join("pkg"));
        assert_eq!(
            normalize_event(root, &rules, &remove),
            vec![ChangeEvent::Deleted("pkg".into())]
        );
    }

    #[cfg_attr(
        not(target_os = "linux"),
        ignore = "watcher latency is only reliable on Linux"
    )]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watcher_reports_file_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let config = WatcherConfig {
            debounce: Duration::from_millis(100),
            ..WatcherConfig::default()
        };
        let _watcher = ChangeWatcher::start(&root, config, tx).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(root.join("new.rs"), "fn n() {}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(ChangeEvent::Changed(path)) if path == "new.rs" => return path,
                    Some(_) => continue,
                    None => panic!("watcher channel closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, "new.rs");
    }
}
