//! # Sync Election
//!
//! The randomized volunteer-suppression state machine that answers a
//! `SyncReq` (§4.4). Every peer that sees a `SyncReq` spawns one of these;
//! each waits a random slice of `election_window_ms`, and whichever one
//! wakes first broadcasts a `SyncClaim` and replays its store. Every other
//! peer's election for the same `req_id` sees that claim arrive (via the
//! replicator's shared `HandledSet`, §4.4) and exits immediately.
//!
//! One election per `req_id` per peer, spawned and cancelled the way the
//! rest of this crate's background tasks are: `tokio::select!` racing the
//! timer against a shared `tokio::sync::Notify`, not a `oneshot` per task
//! (this crate never needs to wait on a single election's result, only to
//! ask it to stop). The `Notify` alone only interrupts a pending sleep; if
//! a timer and a shutdown notification both become ready on the same poll,
//! `select!` is free to pick either branch. The shared `closed` flag closes
//! that window: it is set synchronously by `Replicator::close` before
//! `notify_waiters` fires, so checking it right after every wakeup, before
//! any broadcast, guarantees a closed peer never emits a `SyncClaim` or a
//! replayed `Update` even if it raced the timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rand::Rng;
use tokio::sync::Notify;

use crate::codec::Codec;
use crate::identity::{Clock, NodeId, RequestId};
use crate::message::Message;
use crate::store::Store;
use crate::transport::Transport;

/// Runs one election to completion (or cancellation) and returns whether
/// this peer ended up claiming it. Exposed as a free function rather than a
/// struct because an election has no state worth keeping after it returns:
/// the caller just needs to `tokio::spawn` it and hold the `Notify`/`closed`
/// pair to cancel early on shutdown (§4.4 "cancellable mid-wait").
#[allow(clippy::too_many_arguments)]
pub async fn run<C: Clock>(
    req_id: RequestId,
    local_node: NodeId,
    store: Arc<Store<C>>,
    transport: Arc<Transport>,
    codec: Arc<dyn Codec>,
    handled: Arc<crate::replicator::HandledSet>,
    window_ms: (u64, u64),
    snapshot_pacing_ms: u64,
    shutdown: Arc<Notify>,
    closed: Arc<AtomicBool>,
) -> bool {
    let (low, high) = window_ms;
    let wait_ms = if high > low {
        rand::thread_rng().gen_range(low..=high)
    } else {
        low
    };

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
        _ = shutdown.notified() => {
            debug!("election for {req_id} cancelled while waiting");
            return false;
        }
    }

    // Guards the race described above: the timer branch may have won the
    // select even though shutdown already fired on the same poll.
    if closed.load(Ordering::Acquire) {
        debug!("election for {req_id} observed shutdown after waking, not claiming");
        return false;
    }

    if handled.contains(req_id) {
        debug!("election for {req_id} already claimed by another peer");
        return false;
    }

    let claim = Message::SyncClaim {
        req_id,
        origin_id: local_node,
    };
    if let Ok(bytes) = codec.encode(&claim) {
        transport.send(&bytes).await;
    }
    handled.mark(req_id);

    let snapshot = store.snapshot();
    let pacing = Duration::from_millis(snapshot_pacing_ms.max(1));
    for (key, value, ts) in snapshot {
        if closed.load(Ordering::Acquire) {
            debug!("election for {req_id} observed shutdown mid-replay, stopping");
            return true;
        }
        tokio::select! {
            _ = async {
                let update = Message::Update {
                    key,
                    value,
                    ts,
                    origin_id: local_node,
                };
                if let Ok(bytes) = codec.encode(&update) {
                    transport.send(&bytes).await;
                }
                tokio::time::sleep(pacing).await;
            } => {}
            _ = shutdown.notified() => {
                debug!("election for {req_id} cancelled mid-replay");
                return true;
            }
        }
    }

    true
}
