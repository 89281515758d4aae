//! # Replicator
//!
//! Owns the receive loop, the locally-originated write path, and the set of
//! in-flight sync elections (§4.4, §4.5). This is the module that actually
//! wires `Store`, `Transport`, `Codec` and `election::run` together; the
//! public facade in `lib.rs` is a thin wrapper around it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::codec::Codec;
use crate::config::PeerConfig;
use crate::error::{Error, Result};
use crate::identity::{Clock, NodeId, RequestId};
use crate::message::{Key, Message, Value};
use crate::observer::{ChangeStream, Fanout};
use crate::store::Store;
use crate::transport::Transport;

/// Tracks which `req_id`s this peer has already seen a `SyncClaim` for, so a
/// late-waking election backs off instead of double-replaying (§4.4). Plain
/// `HashSet` behind a `Mutex`: entries are small, short-lived, and the set
/// never needs to support concurrent iteration while being mutated.
pub struct HandledSet {
    seen: Mutex<HashSet<RequestId>>,
}

impl HandledSet {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn mark(&self, req_id: RequestId) {
        self.seen.lock().unwrap().insert(req_id);
    }

    pub fn contains(&self, req_id: RequestId) -> bool {
        self.seen.lock().unwrap().contains(&req_id)
    }

    fn forget(&self, req_id: RequestId) {
        self.seen.lock().unwrap().remove(&req_id);
    }
}

/// The running peer: store, transport, and the background tasks that keep
/// them in sync with the rest of the group.
pub struct Replicator<C: Clock> {
    local_node: NodeId,
    store: Arc<Store<C>>,
    transport: Arc<Transport>,
    codec: Arc<dyn Codec>,
    fanout: Arc<Fanout>,
    handled: Arc<HandledSet>,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
    config: PeerConfig,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock + 'static> Replicator<C> {
    /// Build a peer: bind the transport, seed `initial` contents locally
    /// without emitting any network traffic (§3 Invariant 4), start the
    /// receive loop, then broadcast one `SyncReq` to pull in whatever the
    /// rest of the group already knows (§1, §4.4).
    pub async fn start(
        config: PeerConfig,
        clock: C,
        codec: Arc<dyn Codec>,
        initial: Vec<(Key, Value)>,
    ) -> anyhow::Result<Self> {
        let local_node = NodeId::new();
        let store = Arc::new(Store::new(clock, local_node));
        for (key, value) in initial {
            store.seed(key, value);
        }
        let transport = Arc::new(Transport::bind(&config).await?);
        let fanout = Arc::new(Fanout::new());
        let handled = Arc::new(HandledSet::new());
        let shutdown = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));

        let receive_task = spawn_receive_loop(
            local_node,
            store.clone(),
            transport.clone(),
            codec.clone(),
            fanout.clone(),
            handled.clone(),
            shutdown.clone(),
            closed.clone(),
            config.clone(),
        );

        let replicator = Self {
            local_node,
            store,
            transport,
            codec,
            fanout,
            handled,
            shutdown,
            closed,
            config,
            receive_task: Mutex::new(Some(receive_task)),
        };

        replicator.broadcast_sync_request().await;
        Ok(replicator)
    }

    /// Build a peer without announcing itself on the network. Used by tests
    /// and by embedders that want to seed state and subscribe before
    /// joining the group.
    #[cfg(test)]
    async fn start_silent(
        config: PeerConfig,
        clock: C,
        codec: Arc<dyn Codec>,
    ) -> anyhow::Result<Self> {
        let local_node = NodeId::new();
        let store = Arc::new(Store::new(clock, local_node));
        let transport = Arc::new(Transport::bind(&config).await?);
        let fanout = Arc::new(Fanout::new());
        let handled = Arc::new(HandledSet::new());
        let shutdown = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));

        let receive_task = spawn_receive_loop(
            local_node,
            store.clone(),
            transport.clone(),
            codec.clone(),
            fanout.clone(),
            handled.clone(),
            shutdown.clone(),
            closed.clone(),
            config.clone(),
        );

        Ok(Self {
            local_node,
            store,
            transport,
            codec,
            fanout,
            handled,
            shutdown,
            closed,
            config,
            receive_task: Mutex::new(Some(receive_task)),
        })
    }

    async fn broadcast_sync_request(&self) {
        let req_id = RequestId::new();
        let msg = Message::SyncReq {
            req_id,
            origin_id: self.local_node,
        };
        if let Ok(bytes) = self.codec.encode(&msg) {
            self.transport.send(&bytes).await;
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.local_node
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    pub fn snapshot(&self) -> Vec<(Key, Value)> {
        self.store
            .snapshot()
            .into_iter()
            .map(|(k, v, _ts)| (k, v))
            .collect()
    }

    /// Apply `key = value` locally, then broadcast it (§4.5). Order is
    /// fixed: the frame is encoded and size-checked *before* the store is
    /// touched, so an oversize write never partially applies.
    pub async fn set(&self, key: impl Into<Key>, value: Value) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        let key = key.into();

        let probe = Message::Update {
            key: key.clone(),
            value: value.clone(),
            ts: self.store.now(),
            origin_id: self.local_node,
        };
        let encoded_len = self
            .codec
            .encode(&probe)
            .map_err(Error::Decode)?
            .len();
        if encoded_len > self.config.max_frame_bytes {
            return Err(Error::OversizeWrite {
                size: encoded_len,
                limit: self.config.max_frame_bytes,
            });
        }

        let ts = self.store.local_set(key.clone(), value.clone());
        self.fanout.publish(&key, &value);

        let msg = Message::Update {
            key,
            value,
            ts,
            origin_id: self.local_node,
        };
        if let Ok(bytes) = self.codec.encode(&msg) {
            self.transport.send(&bytes).await;
        }
        Ok(())
    }

    /// Deletion is out of scope for this protocol (§4.7, §9): no tombstone
    /// message exists to propagate it.
    pub fn delete(&self, _key: &str) -> Result<()> {
        Err(Error::DeleteNotSupported)
    }

    pub fn subscribe(&self) -> ChangeStream {
        self.fanout.subscribe(self.config.observer_queue_depth)
    }

    /// Stop the receive loop, cancel in-flight elections, leave the
    /// multicast group, and close every subscriber's stream (§4.7).
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.notify_waiters();
        self.fanout.close_all();
        if let Some(handle) = self.receive_task.lock().unwrap().take() {
            handle.abort();
        }
        self.transport.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_receive_loop<C: Clock + 'static>(
    local_node: NodeId,
    store: Arc<Store<C>>,
    transport: Arc<Transport>,
    codec: Arc<dyn Codec>,
    fanout: Arc<Fanout>,
    handled: Arc<HandledSet>,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
    config: PeerConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                frame = transport.recv() => frame,
                _ = shutdown.notified() => break,
            };
            let Some(frame) = frame else { continue };

            let Some(msg) = codec.decode(&frame) else {
                debug!("dropping undecodable frame of {} bytes", frame.len());
                continue;
            };

            // Self-filtering (§4.4 step 2): loopback is left on at the
            // transport, so every self-sent frame must be dropped here by
            // origin rather than never arriving at all.
            if msg.origin_id() == local_node {
                continue;
            }

            match msg {
                Message::Update {
                    key,
                    value,
                    ts,
                    origin_id,
                } => {
                    if store.merge(&key, value.clone(), ts, origin_id)
                        == crate::store::MergeOutcome::Applied
                    {
                        fanout.publish(&key, &value);
                    }
                }
                Message::SyncReq { req_id, .. } => {
                    let store = store.clone();
                    let transport = transport.clone();
                    let codec = codec.clone();
                    let handled = handled.clone();
                    let shutdown_for_election = shutdown.clone();
                    let closed_for_election = closed.clone();
                    let window_ms = config.election_window_ms();
                    let pacing = config.snapshot_pacing_ms;
                    let handled_for_ttl = handled.clone();
                    let ttl = handled_set_ttl(&config);
                    tokio::spawn(async move {
                        crate::election::run(
                            req_id,
                            local_node,
                            store,
                            transport,
                            codec,
                            handled,
                            window_ms,
                            pacing,
                            shutdown_for_election,
                            closed_for_election,
                        )
                        .await;
                    });
                    spawn_handled_forget(handled_for_ttl, req_id, ttl);
                }
                Message::SyncClaim { req_id, .. } => {
                    handled.mark(req_id);
                    spawn_handled_forget(handled.clone(), req_id, handled_set_ttl(&config));
                }
            }
        }
        warn!("receive loop for node {local_node} exited");
    })
}

/// `HandledSet` entries exist only to let a late election back off; they'd
/// otherwise grow unbounded across a long-lived peer's lifetime. Removal is
/// scheduled once the election window has fully elapsed (with slack)
/// rather than keeping every `req_id` forever.
fn handled_set_ttl(config: &PeerConfig) -> Duration {
    let (_, high) = config.election_window_ms();
    Duration::from_millis(high * 2 + 50)
}

fn spawn_handled_forget(handled: Arc<HandledSet>, req_id: RequestId, ttl: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        handled.forget(req_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use crate::identity::SystemClock;

    fn test_config(group_last_octet: u8) -> PeerConfig {
        let mut config = PeerConfig::default();
        config.port = 0;
        config.group = std::net::Ipv4Addr::new(239, 255, 11, group_last_octet);
        config.election_window_low_ms = 5;
        config.election_window_high_ms = 10;
        config
    }

    #[tokio::test]
    async fn set_then_get_round_trips_locally() {
        let codec: Arc<dyn Codec> = Arc::new(BincodeCodec);
        let replicator = Replicator::start_silent(test_config(1), SystemClock, codec)
            .await
            .unwrap();
        replicator.set("k", Value::string("v")).await.unwrap();
        assert_eq!(replicator.get("k"), Some(Value::string("v")));
    }

    #[tokio::test]
    async fn oversize_write_is_rejected_before_touching_the_store() {
        let mut config = test_config(2);
        config.max_frame_bytes = 4;
        let codec: Arc<dyn Codec> = Arc::new(BincodeCodec);
        let replicator = Replicator::start_silent(config, SystemClock, codec)
            .await
            .unwrap();
        let result = replicator
            .set("k", Value::string("a value too long to fit"))
            .await;
        assert!(matches!(result, Err(Error::OversizeWrite { .. })));
        assert_eq!(replicator.get("k"), None);
    }

    #[tokio::test]
    async fn delete_is_never_supported() {
        let codec: Arc<dyn Codec> = Arc::new(BincodeCodec);
        let replicator = Replicator::start_silent(test_config(3), SystemClock, codec)
            .await
            .unwrap();
        assert!(matches!(
            replicator.delete("anything"),
            Err(Error::DeleteNotSupported)
        ));
    }

    #[tokio::test]
    async fn close_rejects_further_writes() {
        let codec: Arc<dyn Codec> = Arc::new(BincodeCodec);
        let replicator = Replicator::start_silent(test_config(4), SystemClock, codec)
            .await
            .unwrap();
        replicator.close().await;
        replicator.close().await; // idempotent
        let result = replicator.set("k", Value::from(1.0)).await;
        assert!(matches!(result, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn set_publishes_to_subscribers() {
        let codec: Arc<dyn Codec> = Arc::new(BincodeCodec);
        let replicator = Replicator::start_silent(test_config(5), SystemClock, codec)
            .await
            .unwrap();
        let mut stream = replicator.subscribe();
        replicator.set("k", Value::from(7.0)).await.unwrap();
        let (key, value) = stream.recv().await.unwrap();
        assert_eq!(key, "k");
        assert_eq!(value, Value::from(7.0));
    }
}
