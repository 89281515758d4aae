//! # Error Types
//!
//! Steady-state facade operations return this typed `Error` so callers can
//! match on a specific failure instead of string-sniffing an `anyhow::Error`.
//! One-shot setup failures (socket bind/join at construction) stay on
//! `anyhow::Error`, matching this codebase's existing split between a typed
//! enum for operational errors and `anyhow` for "this can only fail at
//! startup" paths.
//!
//! `TransportError` and `DecodeError` are logged-and-continue per §7 of the
//! design — they never propagate to a facade caller — but are kept as enum
//! variants anyway so tests can assert on them structurally rather than by
//! matching log output.

use thiserror::Error;

/// Result type alias for fallible [`crate::ReplicatedMap`] operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Operational error kinds produced by a running peer.
#[derive(Error, Debug)]
pub enum Error {
    /// A local `set` whose encoded frame would exceed `max_frame_bytes`.
    #[error("encoded frame of {size} bytes exceeds max_frame_bytes ({limit})")]
    OversizeWrite { size: usize, limit: usize },

    /// A facade call made after `close()`.
    #[error("peer is shutting down")]
    ShuttingDown,

    /// Deletion is not part of this protocol (§4.7, §9): no tombstone, no
    /// delete-propagation message. Distinct from `ShuttingDown` so callers
    /// get an honest "this will never work" instead of a transient-looking
    /// error.
    #[error("delete is not supported: this protocol never removes entries")]
    DeleteNotSupported,

    /// Send/receive failure at the transport. Logged at debug level by the
    /// transport itself; surfaced here only for tests.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame failed to decode. Dropped silently by the replicator; kept
    /// here only for tests.
    #[error("decode error: {0}")]
    Decode(String),
}
