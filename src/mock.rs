//! Mock engines for testing.
//!
//! Mock engines perform no I/O, but carry identities and shutdown counters
//! so tests can observe which engine a rent produced and when the pool tore
//! it down.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::engine::{Engine, EngineFactory};
use crate::route::Proxy;

static IDENT: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a mock engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

impl EngineId {
    /// Create a new unique engine identifier.
    pub fn new() -> Self {
        Self(IDENT.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// A mock transport engine for testing.
#[derive(Debug, Clone)]
pub struct MockEngine {
    ident: EngineId,
    shutdowns: Arc<AtomicUsize>,
}

impl MockEngine {
    /// Create a new mock engine.
    pub fn new() -> Self {
        let engine = Self {
            ident: EngineId::new(),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        };
        trace!(id = %engine.id(), "creating mock engine");
        engine
    }

    /// Get a unique ID for this engine.
    ///
    /// This is useful for testing that an engine which is shared is indeed
    /// the same engine.
    pub fn id(&self) -> EngineId {
        self.ident
    }

    /// How many times this engine has been shut down.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Whether this engine has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_count() > 0
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MockEngine {
    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// A factory producing [`MockEngine`]s, remembering every engine it built.
#[derive(Debug, Default)]
pub struct MockFactory {
    log: Mutex<Vec<MockEngine>>,
}

impl MockFactory {
    /// Create a new mock factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every engine this factory has built, in creation order.
    pub fn built(&self) -> Vec<MockEngine> {
        self.log.lock().clone()
    }

    /// How many engines this factory has built.
    pub fn built_count(&self) -> usize {
        self.log.lock().len()
    }

    fn build(&self) -> MockEngine {
        let engine = MockEngine::new();
        self.log.lock().push(engine.clone());
        engine
    }
}

impl EngineFactory for MockFactory {
    type Engine = MockEngine;

    fn create_default(&self) -> MockEngine {
        self.build()
    }

    fn create_no_proxy(&self) -> MockEngine {
        self.build()
    }

    fn create_for_proxy(&self, proxy: &Proxy) -> MockEngine {
        trace!(%proxy, "building mock engine for proxy");
        self.build()
    }
}
