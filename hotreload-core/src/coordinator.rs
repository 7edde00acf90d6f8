//! The one place where files, credential stores, and their dependent TLS components
//! meet. All mutations to the store/listener topology are serialized through this
//! component (spec.md §4.3).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hotreload_types::FileChangeEvent;
use parking_lot::Mutex;
use tracing::{error, instrument, warn};

use crate::debounce::DebouncedConsumer;
use crate::observer::FileObserver;
use crate::store::DynamicCredentialStore;

/// Anything that reacts to a credential reload: a rebuilt key selector, trust
/// validator, or TLS context. Held weakly by the coordinator (spec.md §3).
pub trait ReloadListener: Send + Sync {
    fn on_reloaded(&self);
}

struct ListenerEntry {
    seq: u64,
    listener: Weak<dyn ReloadListener>,
}

struct StoreEntry {
    store: Weak<DynamicCredentialStore>,
    data_path: PathBuf,
    listeners: Mutex<Vec<ListenerEntry>>,
}

struct Inner {
    observer: Arc<FileObserver>,
    stores: Mutex<Vec<StoreEntry>>,
    next_seq: AtomicU64,
}

/// Registers watchable stores and their listeners; routes file events to stores; fans
/// out reload callbacks to listeners in registration order.
pub struct ReloadCoordinator {
    inner: Arc<Inner>,
}

impl ReloadCoordinator {
    pub fn new(observer: Arc<FileObserver>) -> Self {
        Self {
            inner: Arc::new(Inner {
                observer,
                stores: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Wires this coordinator as the observer's debounced consumer. Must be called
    /// before `FileObserver::start`.
    pub fn as_consumer(&self) -> Arc<dyn DebouncedConsumer> {
        Arc::new(CoordinatorConsumer {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Registers a store. Stores are held weakly: once garbage-collected, the next
    /// file event for its path that finds no live store triggers an unwatch.
    pub fn register(&self, store: &Arc<DynamicCredentialStore>) {
        let data_path = store.spec().data_path().to_path_buf();
        if let Err(e) = self.inner.observer.watch(&data_path) {
            warn!(path = %data_path.display(), error = %e, "failed to watch credential file");
        }
        self.inner.stores.lock().push(StoreEntry {
            store: Arc::downgrade(store),
            data_path,
            listeners: Mutex::new(Vec::new()),
        });
    }

    /// Registers `listener` against every live store it depends on, matched by spec
    /// field identity (spec.md §4.3's "opaque store handle" indirection is resolved in
    /// this crate by matching on the store's own `data_path`, since the listener is
    /// constructed directly against a `&DynamicCredentialStore` — see SPEC_FULL.md §4).
    pub fn listen(&self, store: &Arc<DynamicCredentialStore>, listener: Weak<dyn ReloadListener>) {
        let data_path = store.spec().data_path().to_path_buf();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let stores = self.inner.stores.lock();
        for entry in stores.iter() {
            if entry.data_path == data_path {
                entry.listeners.lock().push(ListenerEntry {
                    seq,
                    listener: Weak::clone(&listener),
                });
                return;
            }
        }
        warn!(path = %data_path.display(), "listen() called for an unregistered store");
    }

    /// Routes a file event to every store whose spec's `data_path` matches, reloads
    /// each, then fans out listeners in ascending `SeqNum` order.
    #[instrument(skip(self, event), fields(path = %event.path.display()))]
    pub fn on_file_changed(&self, event: FileChangeEvent) {
        let mut matched_any = false;
        let mut dead_store_found = false;

        {
            let mut stores = self.inner.stores.lock();
            stores.retain(|entry| entry.store.strong_count() > 0 || entry.data_path != event.path);
            for entry in stores.iter() {
                if entry.data_path != event.path {
                    continue;
                }
                let Some(store) = entry.store.upgrade() else {
                    dead_store_found = true;
                    continue;
                };
                matched_any = true;
                if let Err(e) = store.reload_from_disk() {
                    error!(path = %event.path.display(), error = %e, "store reload failed; keeping previous credentials");
                    continue;
                }
                fire_listeners(&entry.listeners);
            }
        }

        if dead_store_found || !matched_any {
            self.inner.observer.unwatch(&event.path);
        }
    }

    /// Operator-initiated global reload: reloads every live store, then fans listeners
    /// in one global `SeqNum` ordering across all stores. Returns the paths that failed
    /// to reload.
    pub fn reload_all(&self) -> Vec<(PathBuf, hotreload_types::HotReloadError)> {
        let mut failures = Vec::new();
        let mut all_listeners: Vec<ListenerEntry> = Vec::new();

        {
            let stores = self.inner.stores.lock();
            for entry in stores.iter() {
                let Some(store) = entry.store.upgrade() else {
                    continue;
                };
                match store.reload_from_disk() {
                    Ok(()) => {
                        let listeners = entry.listeners.lock();
                        all_listeners.extend(listeners.iter().map(|l| ListenerEntry {
                            seq: l.seq,
                            listener: Weak::clone(&l.listener),
                        }));
                    }
                    Err(e) => {
                        error!(path = %entry.data_path.display(), error = %e, "reload_all: store reload failed, continuing");
                        failures.push((entry.data_path.clone(), e));
                    }
                }
            }
        }

        all_listeners.sort_by_key(|e| e.seq);
        for entry in &all_listeners {
            if let Some(listener) = entry.listener.upgrade() {
                listener.on_reloaded();
            }
        }

        failures
    }

    /// Number of live listeners currently registered for the store at `path`. Used in
    /// tests to verify garbage-collected listeners are pruned.
    pub fn listener_count(&self, path: &Path) -> usize {
        let stores = self.inner.stores.lock();
        stores
            .iter()
            .find(|e| e.data_path == path)
            .map(|e| {
                let mut listeners = e.listeners.lock();
                listeners.retain(|l| l.listener.strong_count() > 0);
                listeners.len()
            })
            .unwrap_or(0)
    }
}

fn fire_listeners(listeners: &Mutex<Vec<ListenerEntry>>) {
    let mut guard = listeners.lock();
    guard.sort_by_key(|e| e.seq);
    guard.retain(|e| e.listener.strong_count() > 0);
    for entry in guard.iter() {
        if let Some(listener) = entry.listener.upgrade() {
            listener.on_reloaded();
        }
    }
}

struct CoordinatorConsumer {
    inner: Arc<Inner>,
}

impl DebouncedConsumer for CoordinatorConsumer {
    fn on_event(&self, event: FileChangeEvent) {
        ReloadCoordinator {
            inner: Arc::clone(&self.inner),
        }
        .on_file_changed(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserverConfig;
    use crate::store::PemCredentialParser;
    use hotreload_types::ChangeKind;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct RecordingListener {
        order: Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
        calls: AtomicUsize,
    }

    impl ReloadListener for RecordingListener {
        fn on_reloaded(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(self.name);
        }
    }

    const TEST_CERT: &str = "-----BEGIN CERTIFICATE-----\n\
RkFLRS1ERVItQ0VSVElGSUNBVEUtQllURVMtRk9SLVVOSVQtVEVTVFMtAAECAwQF\n\
BgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8gISIjJCUmJygpKissLS4vMDEyMzQ1\n\
Njc4OTo7PD0+Pw==\n\
-----END CERTIFICATE-----\n";

    fn make_store(dir: &TempDir) -> Arc<DynamicCredentialStore> {
        let data_path = dir.path().join("ca.pem");
        std::fs::write(&data_path, TEST_CERT).unwrap();
        let text = format!("location={}\nkeystore.algorithm=PEM\n", data_path.display());
        Arc::new(DynamicCredentialStore::load(&text, Arc::new(PemCredentialParser)).unwrap())
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let dir = TempDir::new().unwrap();
        let observer = Arc::new(FileObserver::new(ObserverConfig::default()));
        let coordinator = ReloadCoordinator::new(observer);
        let store = make_store(&dir);
        coordinator.register(&store);

        let order = Arc::new(Mutex::new(Vec::new()));
        let l0: Arc<dyn ReloadListener> = Arc::new(RecordingListener {
            order: order.clone(),
            name: "l0",
            calls: AtomicUsize::new(0),
        });
        let l1: Arc<dyn ReloadListener> = Arc::new(RecordingListener {
            order: order.clone(),
            name: "l1",
            calls: AtomicUsize::new(0),
        });
        let l2: Arc<dyn ReloadListener> = Arc::new(RecordingListener {
            order: order.clone(),
            name: "l2",
            calls: AtomicUsize::new(0),
        });
        coordinator.listen(&store, Arc::downgrade(&l0));
        coordinator.listen(&store, Arc::downgrade(&l1));
        coordinator.listen(&store, Arc::downgrade(&l2));

        coordinator.on_file_changed(FileChangeEvent::single(
            store.spec().data_path().to_path_buf(),
            ChangeKind::Modified,
        ));

        assert_eq!(*order.lock(), vec!["l0", "l1", "l2"]);
    }

    #[test]
    fn garbage_collected_listener_is_never_called() {
        let dir = TempDir::new().unwrap();
        let observer = Arc::new(FileObserver::new(ObserverConfig::default()));
        let coordinator = ReloadCoordinator::new(observer);
        let store = make_store(&dir);
        coordinator.register(&store);

        let weak = {
            let listener: Arc<dyn ReloadListener> = Arc::new(RecordingListener {
                order: Arc::new(Mutex::new(Vec::new())),
                name: "transient",
                calls: AtomicUsize::new(0),
            });
            let weak = Arc::downgrade(&listener);
            coordinator.listen(&store, weak.clone());
            weak
            // `listener` (the only strong reference) drops here.
        };
        assert_eq!(weak.strong_count(), 0);

        coordinator.on_file_changed(FileChangeEvent::single(
            store.spec().data_path().to_path_buf(),
            ChangeKind::Modified,
        ));

        assert_eq!(coordinator.listener_count(store.spec().data_path()), 0);
    }

    #[test]
    fn reload_all_continues_after_one_store_fails() {
        let dir = TempDir::new().unwrap();
        let observer = Arc::new(FileObserver::new(ObserverConfig::default()));
        let coordinator = ReloadCoordinator::new(observer);

        let good = make_store(&dir);
        coordinator.register(&good);

        let bad_path = dir.path().join("missing-by-the-time-we-reload.pem");
        std::fs::write(&bad_path, TEST_CERT).unwrap();
        let bad_text = format!("location={}\nkeystore.algorithm=PEM\n", bad_path.display());
        let bad = Arc::new(DynamicCredentialStore::load(&bad_text, Arc::new(PemCredentialParser)).unwrap());
        coordinator.register(&bad);
        std::fs::remove_file(&bad_path).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let listener: Arc<dyn ReloadListener> = Arc::new(RecordingListener {
            order: order.clone(),
            name: "good",
            calls: AtomicUsize::new(0),
        });
        coordinator.listen(&good, Arc::downgrade(&listener));

        let failures = coordinator.reload_all();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, bad_path);
        assert_eq!(*order.lock(), vec!["good"]);
    }

    #[test]
    fn reload_all_fires_listeners_again_on_a_second_call() {
        let dir = TempDir::new().unwrap();
        let observer = Arc::new(FileObserver::new(ObserverConfig::default()));
        let coordinator = ReloadCoordinator::new(observer);
        let store = make_store(&dir);
        coordinator.register(&store);

        let order = Arc::new(Mutex::new(Vec::new()));
        let listener = Arc::new(RecordingListener {
            order: order.clone(),
            name: "l0",
            calls: AtomicUsize::new(0),
        });
        let trait_listener: Arc<dyn ReloadListener> = listener.clone();
        coordinator.listen(&store, Arc::downgrade(&trait_listener));

        coordinator.reload_all();
        coordinator.reload_all();

        // A first `reload_all()` must not drain the store's listener list: the second
        // call still needs to find and fire the same listener.
        assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*order.lock(), vec!["l0", "l0"]);
    }
}
