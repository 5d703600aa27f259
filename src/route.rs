//! Routing parameters used to pick an engine for a request.

use std::fmt;

use http::Uri;

/// Where a request is going and how it should get there.
///
/// The pool only reads the routing-relevant parts of a request: the target
/// (for proxy bypass checks) and the proxy policy.
#[derive(Debug, Clone)]
pub struct RequestRoute {
    target: Uri,
    proxy: ProxyPolicy,
}

impl RequestRoute {
    /// Route to `target` using the ambient proxy configuration.
    pub fn new(target: Uri) -> Self {
        Self {
            target,
            proxy: ProxyPolicy::Default,
        }
    }

    /// Route to `target` directly, never through a proxy.
    pub fn direct(target: Uri) -> Self {
        Self {
            target,
            proxy: ProxyPolicy::Disabled,
        }
    }

    /// Route to `target` through a specific proxy.
    pub fn via(target: Uri, proxy: Proxy) -> Self {
        Self {
            target,
            proxy: ProxyPolicy::Proxy(proxy),
        }
    }

    /// The request target.
    pub fn target(&self) -> &Uri {
        &self.target
    }

    /// The proxy policy for this request.
    pub fn proxy(&self) -> &ProxyPolicy {
        &self.proxy
    }
}

/// How a request treats proxies.
#[derive(Debug, Clone, Default)]
pub enum ProxyPolicy {
    /// Connect directly; never use a proxy.
    Disabled,

    /// No proxy was specified; use the default engine.
    #[default]
    Default,

    /// Tunnel through this proxy.
    Proxy(Proxy),
}

/// A proxy endpoint plus the credentials used to authenticate to it.
#[derive(Debug, Clone)]
pub struct Proxy {
    uri: Uri,
    credentials: Option<Credentials>,
    bypass: Vec<String>,
}

impl Proxy {
    /// A proxy at `uri` with no credentials and no bypass list.
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            credentials: None,
            bypass: Vec::new(),
        }
    }

    /// Authenticate to the proxy with `credentials`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Exempt a host from proxying.
    ///
    /// A pattern starting with a dot matches the domain and any subdomain
    /// (`".internal.example.com"`); any other pattern must match the target
    /// host exactly.
    pub fn bypass(mut self, host: impl Into<String>) -> Self {
        self.bypass.push(host.into());
        self
    }

    /// The proxy endpoint.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The proxy credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Returns `true` if `target` is exempt from this proxy.
    pub fn is_bypassed(&self, target: &Uri) -> bool {
        let Some(host) = target.host() else {
            return false;
        };
        self.bypass.iter().any(|pattern| {
            if let Some(domain) = pattern.strip_prefix('.') {
                host == domain || host.ends_with(pattern.as_str())
            } else {
                host == pattern
            }
        })
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Username and password for proxy authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    domain: Option<String>,
}

impl Credentials {
    /// Credentials with a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            domain: None,
        }
    }

    /// Scope the credentials to an authentication domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// The authentication domain, if any.
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &crate::DebugLiteral("\"...\""))
            .field("domain", &self.domain)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_matches_exact_host() {
        let proxy = Proxy::new("http://proxy:8080".parse().unwrap()).bypass("localhost");

        assert!(proxy.is_bypassed(&"http://localhost/status".parse().unwrap()));
        assert!(!proxy.is_bypassed(&"http://localhost.example.com/".parse().unwrap()));
    }

    #[test]
    fn bypass_matches_domain_suffix() {
        let proxy = Proxy::new("http://proxy:8080".parse().unwrap()).bypass(".internal.example.com");

        assert!(proxy.is_bypassed(&"http://internal.example.com/".parse().unwrap()));
        assert!(proxy.is_bypassed(&"http://svc.internal.example.com/".parse().unwrap()));
        assert!(!proxy.is_bypassed(&"http://external.example.com/".parse().unwrap()));
    }

    #[test]
    fn bypass_without_host_never_matches() {
        let proxy = Proxy::new("http://proxy:8080".parse().unwrap()).bypass("localhost");

        assert!(!proxy.is_bypassed(&Uri::from_static("/relative/path")));
    }

    #[test]
    fn proxy_display() {
        let proxy = Proxy::new("http://proxy.example.com:3128".parse().unwrap());
        assert_eq!(proxy.to_string(), "http://proxy.example.com:3128/");
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let credentials = Credentials::new("user", "hunter2").with_domain("CORP");
        let dbg = format!("{:?}", credentials);

        assert!(dbg.contains("user"));
        assert!(dbg.contains("CORP"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn route_defaults_to_ambient_proxy() {
        let route = RequestRoute::new("http://example.com".parse().unwrap());
        assert!(matches!(route.proxy(), ProxyPolicy::Default));
    }
}
