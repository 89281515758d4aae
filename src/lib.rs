//! A small eventually-consistent key-value map, replicated over IP
//! multicast with no coordinator (§1). Peers join a named group, bulk-sync
//! from whichever existing peer wins a randomized election (§4.4), then
//! both originate and receive last-writer-wins updates (§4.1, §4.5) for as
//! long as the process runs.
//!
//! ```no_run
//! use meshmap::{PeerConfig, ReplicatedMap, Value};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let map = ReplicatedMap::join(PeerConfig::default()).await?;
//! map.set("greeting", Value::string("hello")).await?;
//! let mut changes = map.subscribe();
//! while let Some((key, value)) = changes.recv().await {
//!     println!("{key} changed to {value:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
mod election;
pub mod error;
pub mod identity;
pub mod message;
mod observer;
mod replicator;
mod store;
mod transport;

pub use codec::{BincodeCodec, CborCodec, Codec, JsonCodec};
pub use config::PeerConfig;
pub use error::{Error, Result};
pub use identity::{Clock, NodeId, SystemClock, Timestamp};
pub use message::{Key, Message, Value};
pub use observer::ChangeStream;

use std::sync::Arc;

/// A running peer: the public map-style facade over the Store, Transport
/// and Replicator internals (§4.7).
///
/// Cloning is cheap (`Arc` internally) and every clone refers to the same
/// peer; dropping the last handle does not close the peer — call
/// [`ReplicatedMap::close`] explicitly, the way the rest of this crate's
/// shutdown is always an explicit call rather than a `Drop` side effect for
/// anything with network consequences.
#[derive(Clone)]
pub struct ReplicatedMap {
    inner: Arc<replicator::Replicator<SystemClock>>,
}

impl ReplicatedMap {
    /// Join the group named by `config`: bind the transport, seed no
    /// initial contents, start the receive loop, and broadcast one
    /// `SyncReq` to pull in whatever the group already knows (§1, §4.4).
    pub async fn join(config: PeerConfig) -> anyhow::Result<Self> {
        Self::join_with_seed(config, Vec::new()).await
    }

    /// Join the group, seeding `initial` contents locally before
    /// announcing itself (§3 Invariant 4: seeding never broadcasts — only
    /// the single `SyncReq` that follows it goes out on the wire).
    pub async fn join_with_seed(
        config: PeerConfig,
        initial: Vec<(Key, Value)>,
    ) -> anyhow::Result<Self> {
        let codec: Arc<dyn Codec> = Arc::new(BincodeCodec);
        let inner = replicator::Replicator::start(config, SystemClock, codec, initial).await?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Join the group using a specific [`Codec`] instead of the default
    /// bincode wire format (§4.2: the codec is a pluggable collaborator).
    /// All peers sharing a group must agree on one codec.
    pub async fn join_with_codec(
        config: PeerConfig,
        codec: Arc<dyn Codec>,
        initial: Vec<(Key, Value)>,
    ) -> anyhow::Result<Self> {
        let inner = replicator::Replicator::start(config, SystemClock, codec, initial).await?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// This peer's identity on the wire.
    pub fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    /// Current value for `key`, or `None` if it has never been written or
    /// merged (§4.7).
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key)
    }

    /// Whether `key` has ever been written locally or merged from a peer.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    /// A point-in-time copy of every key this peer currently holds (§4.7
    /// iteration-by-snapshot: there is no live cursor over a mutating map).
    pub fn snapshot(&self) -> Vec<(Key, Value)> {
        self.inner.snapshot()
    }

    /// Write `key = value` locally and broadcast it to the group (§4.5).
    /// Fails with [`Error::OversizeWrite`] if the encoded frame would
    /// exceed `max_frame_bytes`, without touching the local store, and
    /// with [`Error::ShuttingDown`] if called after [`ReplicatedMap::close`].
    pub async fn set(&self, key: impl Into<Key>, value: Value) -> Result<()> {
        self.inner.set(key, value).await
    }

    /// Deletion has no place in this protocol (§4.7, §9): there is no
    /// tombstone message to propagate a removal, so this always fails.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    /// Subscribe to every future change this peer applies, local or
    /// remote (§4.6). The returned stream has its own bounded, drop-oldest
    /// queue; a slow subscriber misses old events, never blocks a write.
    pub fn subscribe(&self) -> ChangeStream {
        self.inner.subscribe()
    }

    /// Stop this peer: halt the receive loop, cancel in-flight elections,
    /// and close every subscriber's stream. Idempotent.
    pub async fn close(&self) {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(group_last_octet: u8) -> PeerConfig {
        let mut config = PeerConfig::default();
        config.port = 0;
        config.group = std::net::Ipv4Addr::new(239, 255, 13, group_last_octet);
        config.election_window_low_ms = 5;
        config.election_window_high_ms = 10;
        config
    }

    #[tokio::test]
    async fn join_set_get_round_trips() {
        let _ = env_logger::try_init();
        let map = ReplicatedMap::join(test_config(1)).await.unwrap();
        map.set("k", Value::string("v")).await.unwrap();
        assert_eq!(map.get("k"), Some(Value::string("v")));
        map.close().await;
    }

    #[tokio::test]
    async fn delete_always_fails() {
        let map = ReplicatedMap::join(test_config(2)).await.unwrap();
        assert!(matches!(map.delete("k"), Err(Error::DeleteNotSupported)));
        map.close().await;
    }

    #[tokio::test]
    async fn clone_shares_the_same_underlying_peer() {
        let map = ReplicatedMap::join(test_config(3)).await.unwrap();
        let other = map.clone();
        map.set("k", Value::from(1.0)).await.unwrap();
        assert_eq!(other.get("k"), Some(Value::from(1.0)));
        map.close().await;
    }

    /// End-to-end scenario: a fresh peer joins an existing one-member group
    /// and, within the election window, absorbs its seeded contents (§8
    /// scenario 1). Multicast loopback between two sockets on one host can
    /// be unreliable in a sandboxed network namespace, so this test only
    /// asserts convergence if the frames actually arrived; it never asserts
    /// that they must.
    #[tokio::test]
    async fn late_joiner_absorbs_an_existing_peers_seeded_state() {
        let mut config = test_config(20);
        config.port = 58020;

        let a = ReplicatedMap::join_with_seed(
            config.clone(),
            vec![("club_name".to_string(), Value::string("Club 3"))],
        )
        .await
        .unwrap();

        let mut b_config = config.clone();
        b_config.port = 58020;
        let b = match ReplicatedMap::join(b_config).await {
            Ok(b) => b,
            Err(_) => return,
        };

        let mut changes = b.subscribe();
        let observed = tokio::time::timeout(
            std::time::Duration::from_millis(800),
            changes.recv(),
        )
        .await;

        if let Ok(Some((key, value))) = observed {
            assert_eq!(key, "club_name");
            assert_eq!(value, Value::string("Club 3"));
            assert_eq!(b.get("club_name"), Some(Value::string("Club 3")));
        }

        a.close().await;
        b.close().await;
    }
}
