//! The seam between the pool and the HTTP engine that backs it.
//!
//! The pool never performs I/O itself; it only manages the lifetime of
//! engines built by an injected [`EngineFactory`]. Anything that can issue an
//! HTTP exchange and tear its connections down can be pooled.

use std::sync::Arc;

use crate::route::Proxy;

/// An opaque transport engine.
///
/// The pool needs exactly one lifecycle operation from an engine: tearing it
/// down. Everything else (issuing requests, connection management) is
/// between the engine and the renter holding a [`Lease`][crate::Lease] on it.
pub trait Engine: Send + Sync + 'static {
    /// Tear down the engine's connection handler.
    ///
    /// The pool calls this at most once per engine, either after the engine
    /// has been retired and gone quiescent or unconditionally during pool
    /// shutdown. In the latter case in-flight renters may still hold the
    /// engine; shutdown is authoritative and their next exchange will fail.
    fn shutdown(&self);
}

/// Builds engines, one constructor per routing class.
///
/// Implementations are expected to hand back engines with
/// redirect-following and cookie-jar behavior disabled, since those policies
/// belong to the consumer renting from the pool rather than the transport,
/// and with transport-level decompression enabled.
pub trait EngineFactory: Send + Sync + 'static {
    /// The engine type this factory produces.
    type Engine: Engine;

    /// Build an engine for requests that use the ambient proxy
    /// configuration.
    fn create_default(&self) -> Self::Engine;

    /// Build an engine that connects directly, ignoring any proxy.
    fn create_no_proxy(&self) -> Self::Engine;

    /// Build an engine that tunnels through `proxy`.
    fn create_for_proxy(&self, proxy: &Proxy) -> Self::Engine;
}

impl<F: EngineFactory> EngineFactory for Arc<F> {
    type Engine = F::Engine;

    fn create_default(&self) -> Self::Engine {
        (**self).create_default()
    }

    fn create_no_proxy(&self) -> Self::Engine {
        (**self).create_no_proxy()
    }

    fn create_for_proxy(&self, proxy: &Proxy) -> Self::Engine {
        (**self).create_for_proxy(proxy)
    }
}
