//! # Clock & Identity
//!
//! The smallest component in the design, and deliberately boring: a
//! per-process unique 128-bit node identifier, and an abstraction over "what
//! time is it" so tests can supply a deterministic clock without touching the
//! system clock (the spec calls both of these out as external collaborators —
//! §1 — but a default implementation has to ship for the crate to run
//! standalone).

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A per-process unique 128-bit identifier, fresh on every peer start.
///
/// Backed by a UUIDv4: 128 random bits is exactly the collision budget a
/// node identifier needs, and `uuid` is already how this codebase mints
/// opaque 128-bit ids (see the change-event `op_id` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u128);

impl NodeId {
    /// Mint a fresh, random node id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Names one join event. Structurally identical to [`NodeId`] but kept as a
/// distinct type so a `RequestId` can never be accidentally compared against
/// a `NodeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u128);

impl RequestId {
    /// Mint a fresh request id for a new SYNC_REQ.
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A timestamp: wall-clock seconds as an `f64`. Ordering is plain numeric
/// `>`; ties are broken by [`NodeId`] at the Store (§4.1), not here.
pub type Timestamp = f64;

/// Abstracts the wall clock a peer uses to stamp local writes.
///
/// Kept as a trait (rather than a bare `SystemTime::now()` call scattered
/// through the Store) so tests can inject a clock that advances in
/// controlled steps instead of racing the real one.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, in fractional seconds since the Unix epoch.
    fn now(&self) -> Timestamp;
}

/// The default [`Clock`]: real wall-clock time via [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs_f64()
    }
}
