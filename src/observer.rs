//! # Observer Fan-out
//!
//! Delivers `(key, value)` change events to any number of subscribers, each
//! an independent bounded queue (§4.6). Publishing must be non-blocking and
//! cross-context-safe: the producer runs on the replicator's receive task,
//! the consumer polls `recv` from wherever the embedder chooses. A plain
//! `tokio::sync::mpsc` channel can't implement the required drop-oldest
//! overflow policy (nothing lets a sender evict the channel's own head), so
//! this module is a small purpose-built ring buffer instead, woken with a
//! `tokio::sync::Notify` the same way the rest of this crate signals
//! cross-task events (see `replicator::Replicator::close`).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::message::{Key, Value};

/// One subscriber's bounded, order-preserving queue.
struct ObserverQueue {
    buf: Mutex<VecDeque<(Key, Value)>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl ObserverQueue {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue `(key, value)`, dropping the oldest pending entry if the
    /// queue is already at `capacity`. Never blocks.
    fn push(&self, key: Key, value: Value) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut buf = self.buf.lock().unwrap();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back((key, value));
        drop(buf);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// A live subscription: the change stream AND its own unsubscribe handle
/// (§4.6 asks for both; here the stream IS the handle — dropping it
/// unsubscribes via RAII, and `unsubscribe()` does the same thing early and
/// idempotently for callers who don't want to wait on drop).
pub struct ChangeStream {
    id: u64,
    queue: Arc<ObserverQueue>,
    registry: Arc<Mutex<HashMap<u64, Arc<ObserverQueue>>>>,
}

impl ChangeStream {
    /// Await the next `(key, value)` change, or `None` once the peer has
    /// called `close()` and this stream has drained whatever was already
    /// queued.
    pub async fn recv(&mut self) -> Option<(Key, Value)> {
        loop {
            {
                let mut buf = self.queue.buf.lock().unwrap();
                if let Some(item) = buf.pop_front() {
                    return Some(item);
                }
                if self.queue.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// Number of change events dropped from this subscription due to queue
    /// overflow (§4.6, §7's `ObserverOverflow` policy: never surfaced as an
    /// error, always available as a counter).
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Release this subscription's slot. Idempotent, and safe to call
    /// concurrently with an in-flight publish (`Fanout::publish` snapshots
    /// the registry before iterating, §9).
    pub fn unsubscribe(&self) {
        self.registry.lock().unwrap().remove(&self.id);
        self.queue.close();
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// The subscriber registry. Mutated under its own short critical section,
/// mirroring this codebase's existing `ClientTable` pattern
/// (`Arc<Mutex<HashMap<u64, Arc<...>>>>`) for a concurrently-accessed table
/// of live connections.
#[derive(Default)]
pub struct Fanout {
    next_id: AtomicU64,
    subscribers: Arc<Mutex<HashMap<u64, Arc<ObserverQueue>>>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new subscriber with the given queue depth (§6
    /// `observer_queue_depth`) and return its [`ChangeStream`].
    pub fn subscribe(&self, queue_depth: usize) -> ChangeStream {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ObserverQueue::new(queue_depth.max(1)));
        self.subscribers.lock().unwrap().insert(id, queue.clone());
        ChangeStream {
            id,
            queue,
            registry: self.subscribers.clone(),
        }
    }

    /// Enqueue `(key, value)` on every live subscriber. Snapshot-then-iterate
    /// (§9): we clone the set of `Arc<ObserverQueue>` handles under the lock,
    /// then publish outside it, so a concurrent `unsubscribe` never blocks
    /// on, or is blocked by, a publish in progress.
    pub fn publish(&self, key: &Key, value: &Value) {
        let queues: Vec<Arc<ObserverQueue>> = {
            let subs = self.subscribers.lock().unwrap();
            subs.values().cloned().collect()
        };
        for queue in queues {
            queue.push(key.clone(), value.clone());
        }
    }

    /// Terminate every live stream: subsequent `recv` calls observe the
    /// queue closed and return `None` once drained. Called from
    /// `Replicator::close` (§5).
    pub fn close_all(&self) {
        let subs = self.subscribers.lock().unwrap();
        for queue in subs.values() {
            queue.close();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_a_single_subscriber() {
        let fanout = Fanout::new();
        let mut stream = fanout.subscribe(8);
        fanout.publish(&"k".to_string(), &Value::string("v"));
        let (k, v) = stream.recv().await.unwrap();
        assert_eq!(k, "k");
        assert_eq!(v, Value::string("v"));
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let fanout = Fanout::new();
        let mut a = fanout.subscribe(8);
        let mut b = fanout.subscribe(8);
        fanout.publish(&"k".to_string(), &Value::from(1.0));
        assert_eq!(a.recv().await, Some(("k".to_string(), Value::from(1.0))));
        assert_eq!(b.recv().await, Some(("k".to_string(), Value::from(1.0))));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_it() {
        let fanout = Fanout::new();
        let mut stream = fanout.subscribe(2);
        fanout.publish(&"a".to_string(), &Value::from(1.0));
        fanout.publish(&"b".to_string(), &Value::from(2.0));
        fanout.publish(&"c".to_string(), &Value::from(3.0));
        // "a" was dropped; the reader only ever sees b then c.
        assert_eq!(stream.recv().await, Some(("b".to_string(), Value::from(2.0))));
        assert_eq!(stream.recv().await, Some(("c".to_string(), Value::from(3.0))));
        assert_eq!(stream.dropped(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_ends_the_stream() {
        let fanout = Fanout::new();
        let mut stream = fanout.subscribe(8);
        stream.unsubscribe();
        stream.unsubscribe();
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn unsubscribe_is_safe_concurrent_with_publish() {
        let fanout = Arc::new(Fanout::new());
        let mut stream = fanout.subscribe(8);
        let f = fanout.clone();
        let publisher = tokio::spawn(async move {
            for i in 0..100 {
                f.publish(&"k".to_string(), &Value::from(i as f64));
            }
        });
        stream.unsubscribe();
        publisher.await.unwrap();
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let fanout = Fanout::new();
        {
            let _stream = fanout.subscribe(8);
            assert_eq!(fanout.subscriber_count(), 1);
        }
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
