use crate::config::Config;
use crate::models::Partition;

/// How the proxy answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Try the network, store a fresh copy, fall back to the cached copy on failure.
    NetworkFirst(Partition),
    /// Serve the cached copy when present, otherwise fetch and store.
    CacheFirst(Partition),
    /// Go straight to the network; nothing is cached.
    PassThrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    Contains(String),
    Prefix(String),
}

impl UrlPattern {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Contains(needle) => url.contains(needle.as_str()),
            UrlPattern::Prefix(prefix) => url.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub pattern: UrlPattern,
    pub policy: CachePolicy,
}

/// Ordered URL pattern -> policy table. The first matching route wins;
/// unmatched URLs pass through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, pattern: UrlPattern, policy: CachePolicy) -> Self {
        self.routes.push(Route { pattern, policy });
        self
    }

    /// Tiles and the places API go network-first; the static origin (if
    /// configured) is served cache-first.
    pub fn from_config(config: &Config) -> Self {
        let mut table = Self::new()
            .with_route(
                UrlPattern::Contains(config.tile_host.clone()),
                CachePolicy::NetworkFirst(Partition::Tiles),
            )
            .with_route(
                UrlPattern::Contains(config.places_path.clone()),
                CachePolicy::NetworkFirst(Partition::Api),
            );
        if let Some(ref origin) = config.static_origin {
            table = table.with_route(
                UrlPattern::Prefix(origin.clone()),
                CachePolicy::CacheFirst(Partition::Static),
            );
        }
        table
    }

    pub fn classify(&self, url: &str) -> CachePolicy {
        self.routes
            .iter()
            .find(|r| r.pattern.matches(url))
            .map(|r| r.policy)
            .unwrap_or(CachePolicy::PassThrough)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
