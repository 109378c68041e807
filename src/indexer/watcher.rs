// File watcher for incremental updates

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dashmap::DashMap;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use super::fs::IgnoreRules;
use super::Indexer;
use crate::index::ImportsMap;

/// What a settled path turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Changed,
    Removed,
}

/// Per-root state shared with the event pump and the deferred actions
struct RootState {
    root: PathBuf,
    rules: IgnoreRules,
    imports: RwLock<ImportsMap>,
}

struct WatchedRoot {
    _watcher: RecommendedWatcher,
    state: Arc<RootState>,
    pump: JoinHandle<()>,
}

/// Per-path deferred actions. Each path has at most one pending action; a
/// newer event aborts it and starts a fresh quiet window.
struct Debouncer {
    indexer: Arc<Indexer>,
    delay: Duration,
    pending: DashMap<PathBuf, (u64, AbortHandle)>,
    generation: AtomicU64,
}

impl Debouncer {
    fn dispatch(self: &Arc<Self>, state: &Arc<RootState>, event: Event) {
        let action = match event.kind {
            EventKind::Remove(_) => Action::Removed,
            EventKind::Modify(ModifyKind::Metadata(_)) => return,
            EventKind::Create(_) | EventKind::Modify(_) => Action::Changed,
            _ => return,
        };

        for path in event.paths {
            if !self.indexer.registry().is_supported(&path) || !state.rules.accepts_file(&path) {
                continue;
            }
            debug!("{:?} event for {}", action, path.display());
            self.schedule(Arc::clone(state), path, action);
        }
    }

    fn schedule(self: &Arc<Self>, state: Arc<RootState>, path: PathBuf, action: Action) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let debouncer = Arc::clone(self);
        let key = path.clone();
        // The task may not look at `pending` before its own entry is in place
        let (arm, armed) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            if armed.await.is_err() {
                return;
            }
            tokio::time::sleep(debouncer.delay).await;
            // Claim the slot; a newer event for the path supersedes this one
            if debouncer
                .pending
                .remove_if(&key, |_, (g, _)| *g == generation)
                .is_none()
            {
                return;
            }
            debouncer.settle(&state, &key, action).await;
        });

        if let Some((_, previous)) = self.pending.insert(path, (generation, task.abort_handle())) {
            previous.abort();
        }
        let _ = arm.send(());
    }

    async fn settle(&self, state: &RootState, path: &Path, action: Action) {
        // Renamed away or deleted before the window closed
        let action = if action == Action::Changed && !self.indexer.fs().exists(path).await {
            Action::Removed
        } else {
            action
        };

        match action {
            Action::Changed => {
                let parsed = {
                    let imports = state.imports.read().await;
                    self.indexer.reindex_file(path, &state.root, &imports).await
                };
                if let Some(parsed) = parsed {
                    state.imports.write().await.replace_file(&parsed);
                }
            }
            Action::Removed => {
                if let Err(e) = self.indexer.remove_file(path).await {
                    warn!("Failed to remove {}: {:#}", path.display(), e);
                }
                state.imports.write().await.remove_file(path);
            }
        }
    }

    fn cancel_under(&self, root: &Path) {
        self.pending.retain(|path, (_, handle)| {
            if path.starts_with(root) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }
}

/// Watches any number of roots and feeds settled changes to the indexer
pub struct FileWatcher {
    debouncer: Arc<Debouncer>,
    roots: Mutex<HashMap<PathBuf, WatchedRoot>>,
}

impl FileWatcher {
    pub fn new(indexer: Arc<Indexer>, debounce: Duration) -> Self {
        Self {
            debouncer: Arc::new(Debouncer {
                indexer,
                delay: debounce,
                pending: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
            roots: Mutex::new(HashMap::new()),
        }
    }

    /// Start watching `root`. Builds the root's import map with a pre-scan
    /// first. Watching a root twice is a no-op.
    pub async fn watch(&self, root: &Path) -> Result<()> {
        let root = root.to_path_buf();
        if self.roots.lock().contains_key(&root) {
            debug!("Already watching {}", root.display());
            return Ok(());
        }

        let indexer = &self.debouncer.indexer;
        let config = indexer.config();
        let rules = IgnoreRules::new(&root, &config.exclude, &config.include)?;
        let files = indexer.collect_files(&root).await?;
        let imports = indexer.pre_scan(&files).await;

        let state = Arc::new(RootState {
            root: root.clone(),
            rules,
            imports: RwLock::new(imports),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        let pump = tokio::spawn({
            let debouncer = Arc::clone(&self.debouncer);
            let state = Arc::clone(&state);
            async move {
                while let Some(res) = rx.recv().await {
                    match res {
                        Ok(event) => debouncer.dispatch(&state, event),
                        Err(e) => warn!("File watch error under {}: {}", state.root.display(), e),
                    }
                }
            }
        });

        let mut roots = self.roots.lock();
        if roots.contains_key(&root) {
            pump.abort();
            return Ok(());
        }
        info!("Watching {} ({} files)", root.display(), files.len());
        roots.insert(
            root,
            WatchedRoot {
                _watcher: watcher,
                state,
                pump,
            },
        );
        Ok(())
    }

    /// Stop watching `root`; returns false when it was not watched
    pub fn unwatch(&self, root: &Path) -> bool {
        let Some(watched) = self.roots.lock().remove(root) else {
            return false;
        };
        watched.pump.abort();
        self.debouncer.cancel_under(root);
        info!("Stopped watching {}", root.display());
        true
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.roots.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Drop every subscription, pending action and cached import map
    pub fn close_all(&self) {
        let roots: Vec<WatchedRoot> = self.roots.lock().drain().map(|(_, w)| w).collect();
        for watched in &roots {
            watched.pump.abort();
        }
        self.debouncer.pending.retain(|_, (_, handle)| {
            handle.abort();
            false
        });
        if !roots.is_empty() {
            info!("Closed {} watchers", roots.len());
        }
    }

    /// Feed an event as if the OS had reported it. Paths outside every
    /// watched root are ignored.
    pub fn handle_event(&self, event: Event) {
        let state = {
            let roots = self.roots.lock();
            event.paths.first().and_then(|path| {
                roots
                    .values()
                    .filter(|w| path.starts_with(&w.state.root))
                    .max_by_key(|w| w.state.root.as_os_str().len())
                    .map(|w| Arc::clone(&w.state))
            })
        };
        if let Some(state) = state {
            self.debouncer.dispatch(&state, event);
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use crate::index::db::SqliteGraphStore;
    use crate::index::graph::{GraphStore, NodeLabel, Props};
    use crate::index::jobs::InMemoryJobStore;
    use crate::indexer::fs::{FileSystem, GlobOptions, LocalFileSystem};
    use crate::indexer::parser::ParserRegistry;
    use async_trait::async_trait;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    /// Local file system that counts reads
    struct CountingFs {
        inner: LocalFileSystem,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl FileSystem for CountingFs {
        async fn read_file(&self, path: &Path) -> Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_file(path).await
        }

        async fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path).await
        }

        async fn glob(&self, patterns: &[String], options: GlobOptions) -> Result<Vec<PathBuf>> {
            self.inner.glob(patterns, options).await
        }
    }

    async fn setup(debounce_ms: u64) -> (FileWatcher, Arc<CountingFs>, Arc<SqliteGraphStore>) {
        let store = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        store.ensure_schema().await.unwrap();
        let fs = Arc::new(CountingFs {
            inner: LocalFileSystem::default(),
            reads: AtomicUsize::new(0),
        });
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            Arc::new(InMemoryJobStore::default()),
            fs.clone(),
            Arc::new(ParserRegistry::with_defaults()),
            None,
            IndexingConfig::default(),
        ));
        let watcher = FileWatcher::new(indexer, Duration::from_millis(debounce_ms));
        (watcher, fs, store)
    }

    fn modified(path: &Path) -> Event {
        Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path.to_path_buf())
    }

    async fn file_nodes(store: &SqliteGraphStore) -> usize {
        store.find_nodes(NodeLabel::File, Props::new()).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_rapid_events_collapse_into_one_reindex() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.js");
        std::fs::write(&path, "function foo() {}\n").unwrap();
        let (watcher, fs, store) = setup(100).await;
        watcher.watch(dir.path()).await.unwrap();
        let baseline = fs.reads.load(Ordering::SeqCst);

        for _ in 0..5 {
            watcher.handle_event(modified(&path));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(fs.reads.load(Ordering::SeqCst) - baseline, 1);
        assert_eq!(file_nodes(&store).await, 1);
        watcher.close_all();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_zero_debounce_settles_and_clears_pending() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..20).map(|i| dir.path().join(format!("f{i}.js"))).collect();
        for path in &paths {
            std::fs::write(path, "function foo() {}\n").unwrap();
        }
        let (watcher, fs, store) = setup(0).await;
        watcher.watch(dir.path()).await.unwrap();
        let baseline = fs.reads.load(Ordering::SeqCst);

        for path in &paths {
            watcher.handle_event(modified(path));
        }
        let mut settled = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if file_nodes(&store).await == paths.len() && watcher.debouncer.pending.is_empty() {
                settled = true;
                break;
            }
        }
        assert!(settled, "pending actions did not settle");
        assert_eq!(fs.reads.load(Ordering::SeqCst) - baseline, paths.len());
        watcher.close_all();
    }

    #[tokio::test]
    async fn test_remove_event_deletes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "def run():\n    pass\n").unwrap();
        let (watcher, _, store) = setup(20).await;
        watcher.watch(dir.path()).await.unwrap();

        watcher.handle_event(Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(file_nodes(&store).await, 1);

        std::fs::remove_file(&path).unwrap();
        watcher.handle_event(Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(file_nodes(&store).await, 0);
    }

    #[tokio::test]
    async fn test_ignored_and_unsupported_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/lib")).unwrap();
        let ignored = dir.path().join("node_modules/lib/index.js");
        let unsupported = dir.path().join("notes.md");
        std::fs::write(&ignored, "function x() {}\n").unwrap();
        std::fs::write(&unsupported, "# notes\n").unwrap();
        let (watcher, fs, _) = setup(20).await;
        watcher.watch(dir.path()).await.unwrap();
        let baseline = fs.reads.load(Ordering::SeqCst);

        watcher.handle_event(modified(&ignored));
        watcher.handle_event(modified(&unsupported));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fs.reads.load(Ordering::SeqCst), baseline);
    }

    #[tokio::test]
    async fn test_watch_bookkeeping() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let (watcher, _, _) = setup(20).await;

        watcher.watch(first.path()).await.unwrap();
        watcher.watch(first.path()).await.unwrap();
        watcher.watch(second.path()).await.unwrap();
        assert_eq!(watcher.watched_paths().len(), 2);

        assert!(watcher.unwatch(first.path()));
        assert!(!watcher.unwatch(first.path()));
        assert_eq!(watcher.watched_paths(), vec![second.path().to_path_buf()]);

        watcher.close_all();
        assert!(watcher.watched_paths().is_empty());
    }

    #[tokio::test]
    async fn test_unwatch_cancels_pending_actions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.js");
        std::fs::write(&path, "function foo() {}\n").unwrap();
        let (watcher, fs, _) = setup(200).await;
        watcher.watch(dir.path()).await.unwrap();
        let baseline = fs.reads.load(Ordering::SeqCst);

        watcher.handle_event(modified(&path));
        assert!(watcher.unwatch(dir.path()));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fs.reads.load(Ordering::SeqCst), baseline);
    }

    #[tokio::test]
    async fn test_real_change_is_picked_up() {
        let dir = tempdir().unwrap();
        let (watcher, _, store) = setup(50).await;
        watcher.watch(dir.path()).await.unwrap();

        std::fs::write(dir.path().join("new.rs"), "fn main() {}\n").unwrap();
        let mut found = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if file_nodes(&store).await == 1 {
                found = true;
                break;
            }
        }
        assert!(found, "watcher did not index the new file");
        watcher.close_all();
    }
}
