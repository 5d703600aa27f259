use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};

use super::handle::Handle;
use crate::engine::Engine;
use crate::DebugLiteral;

/// Atomic cell holding the active handle for one routing identity.
///
/// Reads and exchanges are lock-free, so a renter never observes a partially
/// installed handle and a handle is never reachable from two slots. The mutex
/// only serializes first-use creation, keeping racing renters from building
/// more than one engine for the same identity.
pub(crate) struct Slot<E: Engine> {
    active: ArcSwapOption<Handle<E>>,
    init: Mutex<()>,
}

impl<E: Engine> Default for Slot<E> {
    fn default() -> Self {
        Self {
            active: ArcSwapOption::const_empty(),
            init: Mutex::new(()),
        }
    }
}

impl<E: Engine> Slot<E> {
    /// The currently installed handle, if any.
    pub(crate) fn get(&self) -> Option<Arc<Handle<E>>> {
        self.active.load_full()
    }

    /// Serialize first-use creation.
    ///
    /// Hold the guard across the double-check and the install.
    pub(crate) fn creating(&self) -> MutexGuard<'_, ()> {
        self.init.lock()
    }

    /// Install `handle`, returning whatever the exchange displaced.
    pub(crate) fn install(&self, handle: Arc<Handle<E>>) -> Option<Arc<Handle<E>>> {
        self.active.swap(Some(handle))
    }

    /// Empty the slot, returning the displaced handle.
    pub(crate) fn take(&self) -> Option<Arc<Handle<E>>> {
        self.active.swap(None)
    }

    /// Empty the slot if its handle has outlived `max_age`.
    ///
    /// The exchange only wins while the aged handle is still the installed
    /// one; a replacement created concurrently stays put.
    pub(crate) fn rotate(&self, max_age: Duration) -> Option<Arc<Handle<E>>> {
        let current = self.active.load();
        let handle = current.as_ref()?;
        if handle.age() <= max_age {
            return None;
        }

        let previous = self.active.compare_and_swap(&current, None);
        match previous.as_ref() {
            Some(displaced) if Arc::ptr_eq(displaced, handle) => Some(Arc::clone(displaced)),
            _ => None,
        }
    }
}

impl<E: Engine> fmt::Debug for Slot<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.active.load().as_ref() {
            Some(_) => f
                .debug_tuple("Slot")
                .field(&DebugLiteral("Some(...)"))
                .finish(),
            None => f.debug_tuple("Slot").field(&DebugLiteral("None")).finish(),
        }
    }
}
