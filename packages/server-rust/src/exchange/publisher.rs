//! Out-of-band publication of committed cluster-changed events.
//!
//! The dispatcher queues at most one pending event; queuing a newer event
//! before the worker wakes replaces the old one (latest-wins). Listener
//! callbacks run on the worker, outside the exchange lock, so they may
//! re-enter exchange accessors. The event owns its succession-list snapshot,
//! leaving the dispatcher free to overwrite live state immediately.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use super::types::{ClusterChangedEvent, MAX_LISTENERS};

/// Callback invoked for every committed cluster change.
pub type ClusterChangedListener = dyn Fn(&ClusterChangedEvent) + Send + Sync;

#[derive(Default)]
struct PendingSlot {
    event: Option<ClusterChangedEvent>,
    shutting_down: bool,
}

struct PublisherInner {
    slot: Mutex<PendingSlot>,
    notify: Notify,
    listeners: RwLock<Vec<Arc<ClusterChangedListener>>>,
}

/// One-slot, latest-wins event publisher with a dedicated delivery worker.
#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<PublisherInner>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                slot: Mutex::new(PendingSlot::default()),
                notify: Notify::new(),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers a listener.
    ///
    /// # Panics
    ///
    /// Panics if [`MAX_LISTENERS`] listeners are already registered.
    pub fn register_listener(&self, listener: Arc<ClusterChangedListener>) {
        let mut listeners = self.inner.listeners.write();
        assert!(
            listeners.len() < MAX_LISTENERS,
            "at most {MAX_LISTENERS} cluster-changed listeners are supported"
        );
        listeners.push(listener);
    }

    /// The number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Queues an event for delivery, replacing any not-yet-delivered one.
    pub fn queue_event(&self, event: ClusterChangedEvent) {
        {
            let mut slot = self.inner.slot.lock();
            if slot.shutting_down {
                return;
            }
            if slot.event.replace(event).is_some() {
                debug!("coalescing cluster-changed events: replacing undelivered event");
            }
        }
        self.inner.notify.notify_one();
    }

    /// Signals the worker to exit. Any undelivered event is dropped.
    pub fn shutdown(&self) {
        self.inner.slot.lock().shutting_down = true;
        self.inner.notify.notify_one();
    }

    /// Spawns the delivery worker.
    pub(crate) fn spawn_worker(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut slot = inner.slot.lock();
                    if slot.shutting_down {
                        break;
                    }
                    slot.event.take()
                };
                match next {
                    Some(event) => {
                        // Clone the listener list so callbacks run with no
                        // publisher lock held and may register listeners.
                        let listeners: Vec<Arc<ClusterChangedListener>> =
                            inner.listeners.read().clone();
                        for listener in &listeners {
                            listener(&event);
                        }
                    }
                    None => inner.notify.notified().await,
                }
            }
            debug!("cluster-changed publisher worker exiting");
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_core::{ClusterKey, NodeId};
    use tokio::sync::mpsc;

    use super::*;

    fn event(key: u64) -> ClusterChangedEvent {
        ClusterChangedEvent {
            cluster_key: ClusterKey(key),
            succession: vec![NodeId(1), NodeId(2)],
        }
    }

    #[tokio::test]
    async fn delivers_queued_event_to_all_listeners() {
        let publisher = EventPublisher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..2 {
            let tx = tx.clone();
            publisher.register_listener(Arc::new(move |ev: &ClusterChangedEvent| {
                tx.send(ev.clone()).expect("test channel open");
            }));
        }

        let worker = publisher.spawn_worker();
        publisher.queue_event(event(0x10));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery")
            .expect("open");
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery")
            .expect("open");
        assert_eq!(first, event(0x10));
        assert_eq!(second, event(0x10));

        publisher.shutdown();
        worker.await.expect("worker exits");
    }

    #[tokio::test]
    async fn queued_events_coalesce_latest_wins() {
        let publisher = EventPublisher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let tx = tx.clone();
            publisher.register_listener(Arc::new(move |ev: &ClusterChangedEvent| {
                tx.send(ev.clone()).expect("test channel open");
            }));
        }

        // Queue twice before the worker exists: only the latest survives.
        publisher.queue_event(event(0x10));
        publisher.queue_event(event(0x11));

        let worker = publisher.spawn_worker();
        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery")
            .expect("open");
        assert_eq!(delivered.cluster_key, ClusterKey(0x11));

        publisher.shutdown();
        worker.await.expect("worker exits");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_drops_pending_event() {
        let publisher = EventPublisher::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<ClusterChangedEvent>();
        publisher.register_listener(Arc::new(move |ev: &ClusterChangedEvent| {
            let _ = tx.send(ev.clone());
        }));

        publisher.shutdown();
        publisher.queue_event(event(0x10));

        let worker = publisher.spawn_worker();
        worker.await.expect("worker exits immediately");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn listener_limit_is_enforced() {
        let publisher = EventPublisher::new();
        for _ in 0..MAX_LISTENERS {
            publisher.register_listener(Arc::new(|_: &ClusterChangedEvent| {}));
        }
        assert_eq!(publisher.listener_count(), MAX_LISTENERS);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            publisher.register_listener(Arc::new(|_: &ClusterChangedEvent| {}));
        }));
        assert!(result.is_err());
    }
}
