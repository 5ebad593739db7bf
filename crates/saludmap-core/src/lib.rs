//! saludmap core library.
//!
//! Offline-first location and resource caching for a health services map:
//! - `location`: the authoritative current location, with sticky manual overrides
//! - `store`: durable local storage for fixes, saved places, cached places and resources
//! - `proxy`: per-route caching policies in front of the network
//! - `prefetch`: populating the tile cache for an area ahead of time
//! - `places`: nearby places, cache first, normalized from any upstream shape

pub mod config;
pub mod context;
pub mod events;
pub mod geo;
pub mod location;
pub mod models;
pub mod places;
pub mod prefetch;
pub mod proxy;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use context::AppContext;
pub use events::{EventBus, Subscription};
pub use location::{LocationTracker, PositionError, TrackerError};
pub use places::{PlacesState, PlacesSyncEngine};
pub use prefetch::{AreaPrefetcher, PrefetchReport};
pub use proxy::{ProxyError, ResourceCacheProxy};
pub use store::{DurableStore, StorageError};
