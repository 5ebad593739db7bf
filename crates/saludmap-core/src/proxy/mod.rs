//! Resource cache proxy.
//!
//! Every outbound request for map tiles, places API responses, or static
//! assets goes through a `ResourceCacheProxy`. A routing table maps URL
//! patterns to a caching policy:
//!
//! - network-first with cache fallback (tiles, places API)
//! - cache-first (static assets)
//! - pass-through (everything else)
//!
//! The proxy runs on its own task (`ProxyService`) and is reached through a
//! cloneable `ProxyHandle`.

pub mod error;
pub mod routes;
pub mod service;
pub mod transport;

pub use error::{ProxyError, TransportError};
pub use routes::{CachePolicy, Route, RoutingTable, UrlPattern};
pub use service::{
    is_offline_error, ProxyHandle, ProxyLifecycle, ProxyService, Resource, ResourceCacheProxy,
    ResourceFetcher,
};
pub use transport::{FetchedResource, HttpTransport, Transport};
