use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use super::Shared;
use crate::engine::Engine;

/// Reference-counted wrapper around one engine.
///
/// The count tracks outstanding [`Lease`]s, not `Arc` clones: the slot, the
/// disposal queue, and every lease each hold an `Arc`, while `refs` records
/// how many renters may still touch the engine.
pub(crate) struct Handle<E: Engine> {
    engine: E,
    created_at: Instant,
    refs: AtomicUsize,
    shutdown: AtomicBool,
}

impl<E: Engine> Handle<E> {
    /// Wrap a freshly built engine, counted for its first renter.
    pub(crate) fn new(engine: E) -> Self {
        Self {
            engine,
            created_at: Instant::now(),
            refs: AtomicUsize::new(1),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Count another renter.
    pub(crate) fn acquire(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one renter's claim, returning the remaining count.
    ///
    /// Releasing more times than the handle was rented is a bug in the
    /// caller, and panics rather than masking a use-after-release.
    pub(crate) fn release(&self) -> usize {
        let previous = self.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(
            previous > 0,
            "engine handle released more times than it was rented"
        );
        previous - 1
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Tear the engine down, at most once over the handle's lifetime.
    ///
    /// Returns `true` if this call performed the shutdown.
    pub(crate) fn shutdown_engine(&self) -> bool {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.engine.shutdown();
        true
    }
}

impl<E: Engine> Drop for Handle<E> {
    fn drop(&mut self) {
        // Deterministic backstop for handles that never pass through the
        // disposal queue, e.g. when the whole pool is dropped mid-flight.
        self.shutdown_engine();
    }
}

impl<E: Engine> fmt::Debug for Handle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("refs", &self.refs())
            .field("age", &self.age())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// An engine rented from a [`Pool`][super::Pool].
///
/// Dereferences to the engine for issuing a request. Dropping the lease
/// releases the engine back to the pool; each lease releases exactly once.
pub struct Lease<E: Engine> {
    handle: Arc<Handle<E>>,
    shared: Weak<Shared<E>>,
}

impl<E: Engine> Lease<E> {
    pub(crate) fn new(handle: Arc<Handle<E>>, shared: Weak<Shared<E>>) -> Self {
        Self { handle, shared }
    }

    /// The engine backing this lease.
    pub fn engine(&self) -> &E {
        self.handle.engine()
    }
}

impl<E: Engine> Deref for Lease<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        self.handle.engine()
    }
}

impl<E: Engine> fmt::Debug for Lease<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lease").field(&self.handle).finish()
    }
}

impl<E: Engine> Drop for Lease<E> {
    fn drop(&mut self) {
        if self.handle.release() > 0 {
            return;
        }

        if let Some(shared) = self.shared.upgrade() {
            // Quiescent past the rotation age: the handle has likely already
            // been swapped out of its slot, so hand it to the disposal queue
            // rather than waiting for the next rotation tick.
            if self.handle.age() > shared.alive_time() && !self.handle.is_shutdown() {
                trace!("retiring idle engine past its alive time");
                shared.retire(Arc::clone(&self.handle));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    #[test]
    fn refcount_tracks_acquire_and_release() {
        let handle = Handle::new(MockEngine::new());
        assert_eq!(handle.refs(), 1);

        handle.acquire();
        assert_eq!(handle.refs(), 2);

        assert_eq!(handle.release(), 1);
        assert_eq!(handle.release(), 0);
    }

    #[test]
    #[should_panic(expected = "released more times")]
    fn over_release_panics() {
        let handle = Handle::new(MockEngine::new());
        let _ = handle.release();
        let _ = handle.release();
    }

    #[test]
    fn engine_shuts_down_once() {
        let engine = MockEngine::new();
        let handle = Handle::new(engine.clone());

        assert!(handle.shutdown_engine());
        assert!(!handle.shutdown_engine());
        assert_eq!(engine.shutdown_count(), 1);

        drop(handle);
        assert_eq!(engine.shutdown_count(), 1);
    }

    #[test]
    fn drop_is_a_shutdown_backstop() {
        let engine = MockEngine::new();
        drop(Handle::new(engine.clone()));
        assert_eq!(engine.shutdown_count(), 1);
    }

    #[test]
    fn lease_releases_on_drop() {
        let handle = Arc::new(Handle::new(MockEngine::new()));
        handle.acquire();

        let lease = Lease::new(Arc::clone(&handle), Weak::new());
        assert_eq!(handle.refs(), 2);

        drop(lease);
        assert_eq!(handle.refs(), 1);
    }

    #[test]
    fn lease_exposes_engine() {
        let engine = MockEngine::new();
        let handle = Arc::new(Handle::new(engine.clone()));
        let lease = Lease::new(Arc::clone(&handle), Weak::new());

        assert_eq!(lease.id(), engine.id());
        assert_eq!(lease.engine().id(), engine.id());

        let dbg = format!("{:?}", lease);
        assert!(dbg.starts_with("Lease(Handle {"));
    }
}
