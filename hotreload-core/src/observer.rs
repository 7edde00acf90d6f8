//! Watches a dynamic set of files (not directories) and delivers coalesced
//! [`FileChangeEvent`]s to a single consumer (spec.md §4.1).
//!
//! OSes commonly watch directories, not files: this observer maintains
//! `watched_file → parent_directory` and a refcount per directory, and filters raw
//! `notify` events down to just the files it was asked to watch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hotreload_types::{ChangeKind, HotReloadError, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::debounce::{DebouncedConsumer, EventDebouncer};

/// Tunable for the file observer.
#[derive(Debug, Clone, Copy)]
pub struct ObserverConfig {
    /// Window `W` passed to the internal [`EventDebouncer`]. `Duration::ZERO` disables
    /// debouncing (spec.md §6 `event_buffer_window_ms`, default 1000ms).
    pub debounce_window: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(1000),
        }
    }
}

struct WatchState {
    file_to_dir: HashMap<PathBuf, PathBuf>,
    dir_refcounts: HashMap<PathBuf, usize>,
}

struct ObserverInner {
    config: ObserverConfig,
    state: Mutex<WatchState>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
    disabled: AtomicBool,
}

/// Watches a dynamic set of files and forwards debounced changes to a consumer.
pub struct FileObserver {
    inner: Arc<ObserverInner>,
}

impl FileObserver {
    pub fn new(config: ObserverConfig) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                config,
                state: Mutex::new(WatchState {
                    file_to_dir: HashMap::new(),
                    dir_refcounts: HashMap::new(),
                }),
                watcher: Mutex::new(None),
                task: Mutex::new(None),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
            }),
        }
    }

    /// Idempotent: watching the same path twice produces one effective subscription.
    pub fn watch(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| HotReloadError::Configuration(format!("{path:?} has no parent directory")))?
            .to_path_buf();

        let is_new_dir;
        {
            let mut state = self.inner.state.lock();
            if state.file_to_dir.contains_key(&path) {
                return Ok(());
            }
            is_new_dir = !state.dir_refcounts.contains_key(&parent);
            *state.dir_refcounts.entry(parent.clone()).or_insert(0) += 1;
            state.file_to_dir.insert(path.clone(), parent.clone());
        }

        if is_new_dir {
            if let Some(watcher) = self.inner.watcher.lock().as_mut() {
                watcher.watch(&parent, RecursiveMode::NonRecursive).map_err(|e| {
                    HotReloadError::Configuration(format!("watch {}: {e}", parent.display()))
                })?;
            }
        }
        debug!(path = %path.display(), "watching file");
        Ok(())
    }

    /// Removes the subscription. Unwatches the enclosing directory if it has no more
    /// watched files.
    pub fn unwatch(&self, path: &Path) {
        let unwatch_dir;
        let parent;
        {
            let mut state = self.inner.state.lock();
            let Some(p) = state.file_to_dir.remove(path) else {
                return;
            };
            parent = p;
            unwatch_dir = match state.dir_refcounts.get_mut(&parent) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        state.dir_refcounts.remove(&parent);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
        }

        if unwatch_dir {
            if let Some(watcher) = self.inner.watcher.lock().as_mut() {
                let _ = watcher.unwatch(&parent);
            }
        }
        debug!(path = %path.display(), "unwatched file");
    }

    /// Starts the background observation task. May be called at most once.
    pub fn start(&self, consumer: Arc<dyn DebouncedConsumer>) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(HotReloadError::Configuration(
                "FileObserver::start called more than once".into(),
            ));
        }
        let debouncer = Arc::new(EventDebouncer::new(self.inner.config.debounce_window, consumer));
        spawn_worker(Arc::clone(&self.inner), debouncer, 0);
        Ok(())
    }

    /// Stops the task, releases the debouncer, and releases all OS watch handles.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.watcher.lock().take();
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }
}

impl Drop for FileObserver {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_worker(inner: Arc<ObserverInner>, debouncer: Arc<EventDebouncer>, attempt: u8) {
    let task_inner = Arc::clone(&inner);
    let task_debouncer = Arc::clone(&debouncer);
    let handle = tokio::spawn(async move {
        let blocking_inner = Arc::clone(&task_inner);
        let blocking_debouncer = Arc::clone(&task_debouncer);
        let result =
            tokio::task::spawn_blocking(move || watcher_loop(blocking_inner, blocking_debouncer))
                .await;

        match result {
            Ok(()) => {
                debug!("file observer worker exited cleanly");
            }
            Err(join_err) if join_err.is_panic() => {
                if attempt == 0 {
                    warn!("file observer worker panicked; restarting once");
                    spawn_worker(task_inner, task_debouncer, 1);
                } else {
                    error!("file observer worker panicked twice; disabling observer");
                    task_inner.disabled.store(true, Ordering::SeqCst);
                }
            }
            Err(_) => {
                // Cancelled via close(); nothing to do.
            }
        }
    });
    *inner.task.lock() = Some(handle);
}

fn watcher_loop(inner: Arc<ObserverInner>, debouncer: Arc<EventDebouncer>) {
    let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();

    let mut watcher = match notify::recommended_watcher(tx) {
        Ok(w) => w,
        Err(e) => {
            error!("failed to create file watcher: {e}");
            return;
        }
    };

    {
        let state = inner.state.lock();
        for dir in state.dir_refcounts.keys() {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!("failed to watch {}: {e}", dir.display());
            }
        }
    }

    *inner.watcher.lock() = Some(watcher);

    loop {
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(event)) => dispatch(&inner, &debouncer, event),
            Ok(Err(e)) => warn!("file watcher error: {e}"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn dispatch(inner: &Arc<ObserverInner>, debouncer: &Arc<EventDebouncer>, event: notify::Event) {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        // Access/Any/Other carry no actionable kind for our purposes; overflow
        // conditions surface through this arm too and are silently dropped
        // per spec.md §4.1 ("overflow events are ignored").
        _ => return,
    };

    let state = inner.state.lock();
    for path in &event.paths {
        if state.file_to_dir.contains_key(path) {
            debouncer.ingest(path.clone(), kind);
        }
    }
}
