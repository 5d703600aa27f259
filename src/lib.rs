//! Motorpool
//!
//! Reference-counted pooling of the transport engines behind an HTTP client.
//!
//! An *engine* is the opaque object that actually performs HTTP exchanges (it
//! wraps a connection handler, and with it a set of live connections and
//! cached DNS results). Engines are expensive to build and cheap to share, so
//! the [`Pool`] keeps at most one live engine per *routing identity* (direct,
//! default, or a specific proxy + credential combination) and hands out
//! reference-counted [`Lease`]s to it. Aged engines are rotated out on a
//! fixed interval to bound connection and DNS staleness, and retired engines
//! are torn down only once no lease can still reach them.

use std::fmt;

pub mod engine;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;
pub mod pool;
pub mod route;

pub use engine::{Engine, EngineFactory};
pub use pool::{Config, Error, Lease, Pool};
pub use route::{Credentials, Proxy, ProxyPolicy, RequestRoute};

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
