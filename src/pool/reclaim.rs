use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::handle::Handle;
use super::Shared;
use crate::engine::Engine;

/// A retired handle waiting out its quiescence delay before disposal.
pub(crate) struct Retired<E: Engine> {
    pub(super) seq: u64,
    pub(super) queued_at: Instant,
    pub(super) handle: Arc<Handle<E>>,
}

impl<E: Engine> Retired<E> {
    pub(super) fn new(seq: u64, handle: Arc<Handle<E>>) -> Self {
        Self {
            seq,
            queued_at: Instant::now(),
            handle,
        }
    }
}

/// Start the rotation and reclamation loops for `shared`.
///
/// Both loops hold only a weak reference, so they never keep a dropped pool
/// alive; they exit when the shared cancellation token fires or the pool is
/// gone.
pub(super) fn spawn_loops<E: Engine>(shared: &Arc<Shared<E>>) {
    let token = shared.cancellation();
    tokio::spawn(rotation(Arc::downgrade(shared), token.clone()));
    tokio::spawn(reclamation(Arc::downgrade(shared), token));
}

/// Swaps aged handles out of their slots, once per alive-time tick.
///
/// Rotation is advisory for in-flight leases: they keep working until
/// dropped, and only future rents observe the emptied slot.
async fn rotation<E: Engine>(shared: Weak<Shared<E>>, token: CancellationToken) {
    let alive_time = match shared.upgrade() {
        Some(shared) => shared.alive_time(),
        None => return,
    };
    let mut ticks = tokio::time::interval_at(Instant::now() + alive_time, alive_time);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticks.tick() => {}
        }

        let Some(shared) = shared.upgrade() else { break };
        let rotated = shared.rotate_aged();
        if rotated > 0 {
            debug!(rotated, "rotated aged engines out of service");
        }
    }

    trace!("rotation loop stopped");
}

/// Drains the disposal queue, deferring entries until they are both past the
/// dispose delay and quiescent.
///
/// The queue is plain FIFO; a "first seen again" marker detects a full
/// traversal that made no progress, at which point the loop sleeps instead
/// of spinning over deferred entries.
async fn reclamation<E: Engine>(shared: Weak<Shared<E>>, token: CancellationToken) {
    let delay = match shared.upgrade() {
        Some(shared) => shared.dispose_delay(),
        None => return,
    };
    let mut marker: Option<u64> = None;

    loop {
        if token.is_cancelled() {
            break;
        }
        let Some(strong) = shared.upgrade() else { break };

        let Some(entry) = strong.pop_retired() else {
            drop(strong);
            marker = None;
            if wait(&token, delay).await {
                break;
            }
            continue;
        };

        if marker == Some(entry.seq) {
            marker = None;
            let pause = delay
                .checked_sub(entry.queued_at.elapsed())
                .unwrap_or(delay);
            drop(strong);
            if wait(&token, pause).await {
                entry.handle.shutdown_engine();
                break;
            }
            let Some(strong) = shared.upgrade() else {
                entry.handle.shutdown_engine();
                break;
            };
            inspect(&strong, entry, delay, &mut marker);
        } else {
            inspect(&strong, entry, delay, &mut marker);
        }
    }

    // A requeue can race the closing sweep; anything still queued here is
    // torn down before the loop exits.
    if let Some(strong) = shared.upgrade() {
        while let Some(entry) = strong.pop_retired() {
            entry.handle.shutdown_engine();
        }
    }

    trace!("reclamation loop stopped");
}

/// Dispose of `entry` if it is ready, otherwise push it back to the tail.
fn inspect<E: Engine>(
    shared: &Shared<E>,
    entry: Retired<E>,
    delay: Duration,
    marker: &mut Option<u64>,
) {
    if entry.handle.is_shutdown() {
        // Torn down elsewhere (pool close, or a duplicate queue entry).
        return;
    }

    if entry.queued_at.elapsed() < delay || entry.handle.refs() > 0 {
        trace!(refs = entry.handle.refs(), "deferring engine disposal");
        marker.get_or_insert(entry.seq);
        shared.requeue(entry);
    } else {
        trace!("disposing quiescent engine");
        entry.handle.shutdown_engine();
    }
}

/// Sleep for `duration`, returning `true` if cancelled first.
async fn wait(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
