//! Per-object serialized worker with idle eviction (spec.md §4.7).
//!
//! Grounded on `kube_runtime::scheduler::Scheduler`'s per-key dedup and
//! `kube_runtime::controller::runner::Runner`'s bounded concurrent per-key
//! workers with idle eviction. The coalescing behavior spec.md describes —
//! "new events replace the latest known slot... BOOKMARK events update the
//! stream position without waking the worker" — maps directly onto a
//! `tokio::sync::watch` channel per key: a send never blocks and always
//! carries only the newest value, which is exactly the "latest known
//! state, not every intermediate one" guarantee spec.md §4.7 asks for. This
//! also satisfies §4.6's "non-blocking channel... backpressure" requirement
//! structurally, since `watch::Sender::send` cannot block or be dropped.

use orbit_core::event::RawEvent;
use orbit_core::object::ObjectId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Invoked once per coalesced event, strictly sequentially per `ObjectId`
/// (spec.md P6).
pub type ObjectProcessor = Arc<dyn Fn(ObjectId, RawEvent) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

pub struct Queue {
    idle_timeout: Duration,
    processor: ObjectProcessor,
    workers: Mutex<HashMap<ObjectId, watch::Sender<Option<RawEvent>>>>,
}

impl Queue {
    pub fn new(idle_timeout: Duration, processor: ObjectProcessor) -> Arc<Self> {
        Arc::new(Self { idle_timeout, processor, workers: Mutex::new(HashMap::new()) })
    }

    /// Route one event to its per-object worker, spawning the worker on the
    /// first event for a given key. BOOKMARK events never occupy the
    /// coalesced slot or wake a worker (SPEC_FULL.md Open Questions).
    pub fn dispatch(self: &Arc<Self>, id: ObjectId, event: RawEvent) {
        if event.is_bookmark() {
            return;
        }
        let mut workers = self.workers.lock();
        match workers.get(&id) {
            Some(tx) => {
                let _ = tx.send(Some(event));
            }
            None => {
                let (tx, rx) = watch::channel(Some(event));
                workers.insert(id.clone(), tx);
                let queue = Arc::clone(self);
                tokio::spawn(queue.run_worker(id, rx));
            }
        }
    }

    pub fn active_workers(&self) -> usize {
        self.workers.lock().len()
    }

    async fn run_worker(self: Arc<Self>, id: ObjectId, mut rx: watch::Receiver<Option<RawEvent>>) {
        loop {
            let event = rx.borrow_and_update().clone();
            if let Some(event) = event {
                (self.processor)(id.clone(), event).await;
            }
            match tokio::time::timeout(self.idle_timeout, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => break, // sender dropped, queue shutting down
                Err(_) => break,     // idle timeout elapsed
            }
        }
        self.workers.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_core::event::WatchEventKind;
    use orbit_core::object::RawObject;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn id(uid: &str) -> ObjectId {
        ObjectId { namespace: None, name: uid.to_owned(), uid: uid.to_owned() }
    }

    fn event(value: i64) -> RawEvent {
        RawEvent::new(WatchEventKind::Modified, RawObject::new(json!({"spec": {"v": value}})))
    }

    #[tokio::test]
    async fn coalesces_rapid_events_to_the_latest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let processor: ObjectProcessor = Arc::new(move |_id, ev| {
            let seen = Arc::clone(&seen2);
            Box::pin(async move {
                tokio::time::sleep(StdDuration::from_millis(20)).await;
                seen.lock().push(ev.object.spec()["v"].as_i64().unwrap());
            })
        });
        let queue = Queue::new(StdDuration::from_millis(200), processor);

        queue.dispatch(id("a"), event(1));
        // give the worker time to pick up the first event before firing more
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        queue.dispatch(id("a"), event(2));
        queue.dispatch(id("a"), event(3));

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        let recorded = seen.lock().clone();
        assert_eq!(recorded.first(), Some(&1));
        assert_eq!(recorded.last(), Some(&3));
        assert!(recorded.len() <= 2, "intermediate value 2 should have been coalesced away: {recorded:?}");
    }

    #[tokio::test]
    async fn bookmark_does_not_spawn_a_worker() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let processor: ObjectProcessor = Arc::new(move |_id, _ev| {
            count2.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {})
        });
        let queue = Queue::new(StdDuration::from_millis(50), processor);
        let bookmark = RawEvent::new(WatchEventKind::Bookmark, RawObject::new(json!({})));
        queue.dispatch(id("a"), bookmark);
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(queue.active_workers(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn idle_worker_is_evicted() {
        let processor: ObjectProcessor = Arc::new(|_id, _ev| Box::pin(async {}));
        let queue = Queue::new(StdDuration::from_millis(20), processor);
        queue.dispatch(id("a"), event(1));
        assert_eq!(queue.active_workers(), 1);
        tokio::time::sleep(StdDuration::from_millis(60)).await;
        assert_eq!(queue.active_workers(), 0);
    }
}
