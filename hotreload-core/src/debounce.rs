//! Per-file time-window buffering between the raw [`crate::observer::FileObserver`] and
//! whatever consumes coalesced [`FileChangeEvent`]s (spec.md §4.2).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hotreload_types::{ChangeKind, FileChangeEvent};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Downstream sink for debounced events. Implementations must not block for long —
/// a slow consumer stalls delivery of the next fired window (spec.md §5).
pub trait DebouncedConsumer: Send + Sync {
    fn on_event(&self, event: FileChangeEvent);
}

struct PendingWindow {
    kinds: Vec<ChangeKind>,
}

/// Coalesces bursts of filesystem events per file into a single downstream delivery.
///
/// `window = Duration::ZERO` disables debouncing entirely: events flow straight through.
pub struct EventDebouncer {
    window: Duration,
    consumer: Arc<dyn DebouncedConsumer>,
    pending: Arc<Mutex<HashMap<PathBuf, PendingWindow>>>,
}

impl EventDebouncer {
    pub fn new(window: Duration, consumer: Arc<dyn DebouncedConsumer>) -> Self {
        Self {
            window,
            consumer,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ingests one raw event for `path`. Starts a timer on the first event for a
    /// quiescent file; subsequent events within the window append to the same buffer.
    pub fn ingest(&self, path: PathBuf, kind: ChangeKind) {
        if self.window.is_zero() {
            self.deliver(FileChangeEvent::single(path, kind));
            return;
        }

        let mut guard = self.pending.lock();
        if let Some(window) = guard.get_mut(&path) {
            window.kinds.push(kind);
            return;
        }

        guard.insert(
            path.clone(),
            PendingWindow {
                kinds: vec![kind],
            },
        );
        drop(guard);

        let pending = Arc::clone(&self.pending);
        let consumer = Arc::clone(&self.consumer);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let fired = pending.lock().remove(&path);
            if let Some(fired) = fired {
                debug!(path = %path.display(), count = fired.kinds.len(), "debounce window fired");
                Self::deliver_to(&consumer, FileChangeEvent {
                    path,
                    kinds: fired.kinds,
                });
            }
        });
    }

    fn deliver(&self, event: FileChangeEvent) {
        Self::deliver_to(&self.consumer, event);
    }

    fn deliver_to(consumer: &Arc<dyn DebouncedConsumer>, event: FileChangeEvent) {
        let consumer = Arc::clone(consumer);
        let result = catch_unwind(AssertUnwindSafe(|| consumer.on_event(event)));
        if result.is_err() {
            warn!("debounced consumer panicked; isolating and continuing");
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_file_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct RecordingConsumer {
        events: Mutex<Vec<FileChangeEvent>>,
        notify: Notify,
        hits: AtomicUsize,
    }

    impl RecordingConsumer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                notify: Notify::new(),
                hits: AtomicUsize::new(0),
            })
        }
    }

    impl DebouncedConsumer for RecordingConsumer {
        fn on_event(&self, event: FileChangeEvent) {
            self.events.lock().push(event);
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_one();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn merges_bursts_within_window_in_arrival_order() {
        let consumer = RecordingConsumer::new();
        let debouncer = EventDebouncer::new(Duration::from_millis(1000), consumer.clone());

        let path = PathBuf::from("/tmp/a");
        debouncer.ingest(path.clone(), ChangeKind::Created);
        tokio::time::advance(Duration::from_millis(200)).await;
        debouncer.ingest(path.clone(), ChangeKind::Modified);
        tokio::time::advance(Duration::from_millis(300)).await;
        debouncer.ingest(path.clone(), ChangeKind::Deleted);

        tokio::time::advance(Duration::from_millis(600)).await;
        consumer.notify.notified().await;

        let events = consumer.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].kinds,
            vec![ChangeKind::Created, ChangeKind::Modified, ChangeKind::Deleted]
        );
        assert_eq!(consumer.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_window_delivers_immediately() {
        let consumer = RecordingConsumer::new();
        let debouncer = EventDebouncer::new(Duration::ZERO, consumer.clone());
        debouncer.ingest(PathBuf::from("/tmp/a"), ChangeKind::Modified);
        assert_eq!(consumer.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unrelated_files_get_independent_windows() {
        let consumer = RecordingConsumer::new();
        let debouncer = EventDebouncer::new(Duration::from_millis(50), consumer.clone());
        debouncer.ingest(PathBuf::from("/tmp/a"), ChangeKind::Modified);
        debouncer.ingest(PathBuf::from("/tmp/b"), ChangeKind::Modified);
        assert_eq!(debouncer.pending_file_count(), 2);
    }
}
