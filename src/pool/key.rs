use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;

use super::slot::Slot;
use crate::engine::Engine;
use crate::route::{Proxy, ProxyPolicy, RequestRoute};

/// Identity of one proxy + credential combination, reduced to a fixed-width
/// hash of the proxy endpoint and its credentials.
///
/// Distinct proxies that happen to hash to the same value share a slot (and
/// with it an engine); the key is deliberately not disambiguated further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ProxyKey(u64);

impl ProxyKey {
    pub(crate) fn of(proxy: &Proxy) -> Self {
        let mut hasher = DefaultHasher::new();

        let uri = proxy.uri();
        uri.scheme_str().hash(&mut hasher);
        uri.host().hash(&mut hasher);
        uri.port_u16().hash(&mut hasher);

        if let Some(credentials) = proxy.credentials() {
            credentials.username().hash(&mut hasher);
            credentials.password().hash(&mut hasher);
            credentials.domain().hash(&mut hasher);
        }

        Self(hasher.finish())
    }
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy-{:016x}", self.0)
    }
}

/// The routing class a request resolves to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RouteClass<'r> {
    /// Connect directly, ignoring proxies.
    NoProxy,

    /// No proxy configured, or the proxy is bypassed for the target.
    Default,

    /// Tunnel through a specific proxy.
    Proxied(ProxyKey, &'r Proxy),
}

/// Classify a request's routing parameters.
pub(crate) fn classify(route: &RequestRoute) -> RouteClass<'_> {
    match route.proxy() {
        ProxyPolicy::Disabled => RouteClass::NoProxy,
        ProxyPolicy::Default => RouteClass::Default,
        ProxyPolicy::Proxy(proxy) if proxy.is_bypassed(route.target()) => RouteClass::Default,
        ProxyPolicy::Proxy(proxy) => RouteClass::Proxied(ProxyKey::of(proxy), proxy),
    }
}

/// Maps routing classes to slots.
///
/// Two fixed slots cover direct and default traffic; proxy identities get
/// buckets on demand in a concurrent map keyed by [`ProxyKey`].
pub(crate) struct KeySpace<E: Engine> {
    no_proxy: Arc<Slot<E>>,
    default: Arc<Slot<E>>,
    proxied: DashMap<ProxyKey, Arc<Slot<E>>>,
}

impl<E: Engine> Default for KeySpace<E> {
    fn default() -> Self {
        Self {
            no_proxy: Arc::default(),
            default: Arc::default(),
            proxied: DashMap::new(),
        }
    }
}

impl<E: Engine> KeySpace<E> {
    /// The slot for a routing class, creating a proxy bucket on demand.
    pub(crate) fn slot(&self, class: &RouteClass<'_>) -> Arc<Slot<E>> {
        match class {
            RouteClass::NoProxy => Arc::clone(&self.no_proxy),
            RouteClass::Default => Arc::clone(&self.default),
            RouteClass::Proxied(key, _) => self.proxied.entry(*key).or_default().clone(),
        }
    }

    /// Visit every slot: the two fixed ones plus every proxy bucket created
    /// so far.
    pub(crate) fn for_each_slot(&self, mut f: impl FnMut(&Slot<E>)) {
        f(&self.no_proxy);
        f(&self.default);
        for bucket in self.proxied.iter() {
            f(bucket.value());
        }
    }
}

impl<E: Engine> fmt::Debug for KeySpace<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySpace")
            .field("buckets", &self.proxied.len())
            .finish_non_exhaustive()
    }
}
