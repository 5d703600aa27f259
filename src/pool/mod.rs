//! Engine pooling, keyed by proxy route.
//!
//! The pool keeps at most one live engine per routing identity: one for
//! direct (no-proxy) traffic, one for default traffic, and one per distinct
//! proxy + credential combination. Renting never blocks on I/O (the fast
//! path is an atomic slot read plus a reference-count increment), and only
//! the first renter of an empty slot builds an engine, under a short
//! creation lock that racing renters resolve by adopting the winner's
//! engine.
//!
//! Two background loops bound staleness and reclaim resources. The rotation
//! loop swaps engines older than the configured alive time out of their
//! slots; in-flight leases keep working, and the next rent builds a fresh
//! engine. The reclamation loop drains the disposal queue, tearing an engine
//! down only once it has waited out the dispose delay with no outstanding
//! leases; the delay, together with a reference-count re-check, keeps a
//! rotation that races a rent from freeing an engine a new renter is about
//! to use.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::SegQueue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

mod handle;
mod key;
mod reclaim;
mod slot;

pub use self::handle::Lease;

use self::handle::Handle;
use self::key::{classify, KeySpace, RouteClass};
use self::reclaim::Retired;
use self::slot::Slot;
use crate::engine::{Engine, EngineFactory};
use crate::route::RequestRoute;

/// Configuration for an engine pool.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// The maximum age an engine may reach before it is rotated out of its
    /// slot, and the interval at which rotation runs.
    pub alive_time: Duration,

    /// The minimum quiescence between retiring an engine and tearing it
    /// down, during which the reference count is re-checked.
    pub dispose_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alive_time: Duration::from_secs(600),
            dispose_delay: Duration::from_secs(10),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        if self.alive_time.is_zero() {
            return Err(Error::InvalidAliveTime);
        }
        if self.dispose_delay.is_zero() {
            return Err(Error::InvalidDisposeDelay);
        }
        Ok(())
    }
}

/// Pool error type.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The pool has been closed; no further engines can be rented.
    #[error("pool is closed")]
    Closed,

    /// The configured alive time must be a positive duration.
    #[error("alive time must be a positive duration")]
    InvalidAliveTime,

    /// The configured dispose delay must be a positive duration.
    #[error("dispose delay must be a positive duration")]
    InvalidDisposeDelay,
}

/// A pool of transport engines, at most one live engine per routing
/// identity.
///
/// [`rent`][Pool::rent] returns a [`Lease`] sharing the identity's engine
/// with every other outstanding lease for it. Clones share the same pool.
pub struct Pool<F: EngineFactory> {
    factory: Arc<F>,
    shared: Arc<Shared<F::Engine>>,
}

impl<F: EngineFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: EngineFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("keys", &self.shared.keys)
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}

impl<F: EngineFactory> Pool<F> {
    /// Create a pool around `factory`.
    ///
    /// Spawns the rotation and reclamation loops, so this must be called
    /// within a tokio runtime. Fails if either configured duration is zero.
    pub fn new(factory: F, config: Config) -> Result<Self, Error> {
        config.validate()?;

        let shared = Arc::new(Shared {
            alive_time: config.alive_time,
            dispose_delay: config.dispose_delay,
            keys: KeySpace::default(),
            retired: SegQueue::new(),
            retire_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        reclaim::spawn_loops(&shared);

        Ok(Self {
            factory: Arc::new(factory),
            shared,
        })
    }

    /// Rent an engine appropriate for `route`.
    ///
    /// Two rents with equivalent routing parameters share the same engine
    /// until a rotation retires it. Fails with [`Error::Closed`] once the
    /// pool has been closed.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn rent(&self, route: &RequestRoute) -> Result<Lease<F::Engine>, Error> {
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }

        let class = classify(route);
        let slot = self.shared.keys.slot(&class);
        let handle = self.checkout(&slot, &class);

        // Shutdown is authoritative. A close racing this rent may have swept
        // the slot before the engine landed in it, so the closing sweep
        // cannot have torn it down; release the claim and do it here.
        if self.shared.is_closed() {
            handle.release();
            handle.shutdown_engine();
            return Err(Error::Closed);
        }
        Ok(Lease::new(handle, Arc::downgrade(&self.shared)))
    }

    fn checkout(&self, slot: &Slot<F::Engine>, class: &RouteClass<'_>) -> Arc<Handle<F::Engine>> {
        if let Some(handle) = slot.get() {
            trace!("engine found in slot");
            handle.acquire();
            return handle;
        }

        let _creating = slot.creating();
        if let Some(handle) = slot.get() {
            trace!("engine created elsewhere, adopting it");
            handle.acquire();
            return handle;
        }

        debug!("building engine for empty slot");
        let engine = match class {
            RouteClass::NoProxy => self.factory.create_no_proxy(),
            RouteClass::Default => self.factory.create_default(),
            RouteClass::Proxied(_, proxy) => self.factory.create_for_proxy(proxy),
        };
        let handle = Arc::new(Handle::new(engine));
        if let Some(displaced) = slot.install(Arc::clone(&handle)) {
            // An exchange loser's engine is never abandoned.
            self.shared.retire(displaced);
        }
        handle
    }

    /// Close the pool.
    ///
    /// Idempotent. Cancels both background loops, then unconditionally tears
    /// down every engine still reachable from a slot or the disposal queue,
    /// regardless of reference counts. Outstanding leases keep their (now
    /// shut down) engines until dropped, and every subsequent rent fails
    /// with [`Error::Closed`].
    pub fn close(&self) {
        self.shared.close();
    }

    /// Whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// State shared by the pool's clones, its leases, and its background loops.
///
/// Loops and leases reach it through `Weak`, so background work never keeps
/// a dropped pool alive.
pub(crate) struct Shared<E: Engine> {
    alive_time: Duration,
    dispose_delay: Duration,
    keys: KeySpace<E>,
    retired: SegQueue<Retired<E>>,
    retire_seq: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl<E: Engine> Shared<E> {
    pub(crate) fn alive_time(&self) -> Duration {
        self.alive_time
    }

    pub(crate) fn dispose_delay(&self) -> Duration {
        self.dispose_delay
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue `handle` for disposal once quiescent.
    pub(crate) fn retire(&self, handle: Arc<Handle<E>>) {
        let seq = self.retire_seq.fetch_add(1, Ordering::SeqCst);
        self.retired.push(Retired::new(seq, handle));
    }

    pub(crate) fn pop_retired(&self) -> Option<Retired<E>> {
        self.retired.pop()
    }

    pub(crate) fn requeue(&self, entry: Retired<E>) {
        self.retired.push(entry);
    }

    /// Swap every aged handle out of its slot and queue it for disposal.
    pub(crate) fn rotate_aged(&self) -> usize {
        let mut rotated = 0;
        self.keys.for_each_slot(|slot| {
            if let Some(handle) = slot.rotate(self.alive_time) {
                trace!(age = ?handle.age(), "retiring aged engine");
                self.retire(handle);
                rotated += 1;
            }
        });
        rotated
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let mut swept = 0;
        self.keys.for_each_slot(|slot| {
            if let Some(handle) = slot.take() {
                if handle.shutdown_engine() {
                    swept += 1;
                }
            }
        });
        while let Some(entry) = self.retired.pop() {
            if entry.handle.shutdown_engine() {
                swept += 1;
            }
        }
        debug!(swept, "pool closed");
    }
}

impl<E: Engine> Drop for Shared<E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<E: Engine> fmt::Debug for Shared<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("keys", &self.keys)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
