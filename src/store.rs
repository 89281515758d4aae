//! # Store
//!
//! The authoritative local mapping from key to value plus a parallel mapping
//! from key to last-write timestamp (§4.1). Thread-safe via `RwLock<HashMap>`,
//! following this codebase's existing `RwLockEngine`: multiple concurrent
//! readers, a single writer, no race conditions. Unlike `RwLockEngine`, an
//! `Entry` here also records the timestamp and originating `NodeId` of the
//! write that produced it, because last-writer-wins merge needs both to
//! decide whether an incoming update should replace the current value.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::identity::{Clock, NodeId, Timestamp};
use crate::message::{Key, Value};

/// One stored key's value, the timestamp of the write that produced it, and
/// the node that made that write (used only to break an exact-timestamp
/// tie, §4.1).
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    ts: Timestamp,
    last_writer: NodeId,
}

/// Outcome of a [`Store::merge`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The incoming update had the newer (or tie-break-winning) timestamp
    /// and was installed.
    Applied,
    /// The incoming update was older, or lost an equal-timestamp tie, and
    /// was discarded.
    Suppressed,
}

/// The local key-value map plus its timestamp shadow, guarded by a single
/// `RwLock` so a reader can never observe a value paired with the wrong
/// timestamp (Invariant 3, §3).
pub struct Store<C: Clock> {
    data: RwLock<HashMap<Key, Entry>>,
    clock: C,
    local_node: NodeId,
}

impl<C: Clock> Store<C> {
    /// Build an empty store. `local_node` is recorded as the `last_writer`
    /// for every `local_set`, so a subsequent equal-timestamp remote update
    /// from a higher NodeId can still win the tie-break (§4.1).
    pub fn new(clock: C, local_node: NodeId) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            clock,
            local_node,
        }
    }

    /// Seed initial contents without assigning them a "from the future"
    /// timestamp relative to later writes: seeded entries get `ts = 0.0`,
    /// the lowest possible timestamp, so any real write — local or remote —
    /// always supersedes them. Per Invariant 4 (§3), this never touches the
    /// network; callers are expected to call this before starting the
    /// receive task.
    pub fn seed(&self, key: impl Into<Key>, value: Value) {
        let mut data = self.data.write().unwrap();
        data.insert(
            key.into(),
            Entry {
                value,
                ts: 0.0,
                last_writer: self.local_node,
            },
        );
    }

    /// Pure lookup; does not clone the whole map.
    pub fn get(&self, key: &str) -> Option<Value> {
        let data = self.data.read().unwrap();
        data.get(key).map(|e| e.value.clone())
    }

    /// Whether `key` has ever been written (locally, remotely, or seeded).
    pub fn contains(&self, key: &str) -> bool {
        let data = self.data.read().unwrap();
        data.contains_key(key)
    }

    /// The clock's current reading, without writing anything. Used by the
    /// replicator to size-probe an encoded frame with a realistic
    /// timestamp before committing to `local_set` (§4.5: the oversize check
    /// must happen before the Store is touched).
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Assign `ts = now()`, install unconditionally, and return the
    /// timestamp assigned. Local writes always win over prior local state
    /// because the clock is assumed non-decreasing on a single host.
    pub fn local_set(&self, key: impl Into<Key>, value: Value) -> Timestamp {
        let ts = self.clock.now();
        let mut data = self.data.write().unwrap();
        data.insert(
            key.into(),
            Entry {
                value,
                ts,
                last_writer: self.local_node,
            },
        );
        ts
    }

    /// Install `(value, ts, origin)` iff `ts` is newer than the entry
    /// currently stored for `key`, or ties it and `origin` compares greater
    /// than the entry's recorded `last_writer` (§4.1). An absent key counts
    /// as `-∞`, so any first arrival is always applied.
    pub fn merge(&self, key: &str, value: Value, ts: Timestamp, origin: NodeId) -> MergeOutcome {
        let mut data = self.data.write().unwrap();
        match data.get(key) {
            Some(current) if ts < current.ts => MergeOutcome::Suppressed,
            Some(current) if ts == current.ts && origin <= current.last_writer => {
                MergeOutcome::Suppressed
            }
            _ => {
                data.insert(
                    key.to_string(),
                    Entry {
                        value,
                        ts,
                        last_writer: origin,
                    },
                );
                MergeOutcome::Applied
            }
        }
    }

    /// A consistent point-in-time copy of every `(key, value, ts)`, taken
    /// under the same read lock so no partial update is visible.
    pub fn snapshot(&self) -> Vec<(Key, Value, Timestamp)> {
        let data = self.data.read().unwrap();
        data.iter()
            .map(|(k, e)| (k.clone(), e.value.clone(), e.ts))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().is_empty()
    }
}
