use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::normalize_bytes;
use crate::config::Config;
use crate::events::{EventBus, Subscription};
use crate::location::LocationTracker;
use crate::models::{CachedPlace, Coordinates, LocationFix, SEARCH_CATEGORIES};
use crate::proxy::{is_offline_error, ProxyError, ResourceFetcher};
use crate::store::DurableStore;

/// Radius sent to the places API, in meters.
pub const DEFAULT_SEARCH_RADIUS_M: u32 = 3000;

const OFFLINE_NO_CACHE: &str = "Offline and no saved places nearby";

/// What the front end shows for "places near me".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacesState {
    pub location: Option<Coordinates>,
    pub places: Vec<CachedPlace>,
    pub loading: bool,
    pub error: Option<String>,
    /// True when `places` came from the local cache rather than a fresh response.
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacesSettings {
    pub api_base_url: String,
    pub search_radius_m: u32,
    pub nearby_radius_m: f64,
}

impl Default for PlacesSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PlacesSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_base_url: config.api_base_url.clone(),
            search_radius_m: config.places_radius_m,
            nearby_radius_m: config.nearby_radius_m,
        }
    }

    pub fn places_url(&self, at: Coordinates) -> String {
        let types: Vec<&str> = SEARCH_CATEGORIES.iter().map(|t| t.as_str()).collect();
        format!(
            "{}/places?lat={}&lng={}&types={}&radius={}",
            self.api_base_url.trim_end_matches('/'),
            at.lat,
            at.lng,
            types.join(","),
            self.search_radius_m
        )
    }
}

struct EngineInner {
    tracker: LocationTracker,
    store: Arc<DurableStore>,
    fetcher: Arc<dyn ResourceFetcher>,
    settings: PlacesSettings,
    online: AtomicBool,
    /// Bumped for every location update; results of older updates are dropped.
    generation: AtomicU64,
    bus: EventBus<PlacesState>,
    subscription: Mutex<Option<Subscription>>,
}

/// Keeps "places near the current location" in sync, preferring the local
/// cache and falling back to the places API.
/// Clone is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct PlacesSyncEngine {
    inner: Arc<EngineInner>,
}

impl PlacesSyncEngine {
    pub fn new(
        tracker: LocationTracker,
        store: Arc<DurableStore>,
        fetcher: Arc<dyn ResourceFetcher>,
        settings: PlacesSettings,
    ) -> Self {
        let bus = EventBus::new();
        bus.publish(PlacesState::default());
        Self {
            inner: Arc::new(EngineInner {
                tracker,
                store,
                fetcher,
                settings,
                online: AtomicBool::new(true),
                generation: AtomicU64::new(0),
                bus,
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Start following the tracker. Calling it again is a no-op.
    /// Must be called from within a tokio runtime.
    pub fn initialize(&self) -> Result<()> {
        let mut subscription = self.inner.subscription.lock().unwrap_or_else(|e| e.into_inner());
        if subscription.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().context("Places engine needs a running tokio runtime")?;
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        *subscription = Some(self.inner.tracker.subscribe(move |fix| {
            let Some(inner) = weak.upgrade() else { return };
            let engine = PlacesSyncEngine { inner };
            let generation = engine.next_generation();
            let fix = fix.clone();
            runtime.spawn(async move {
                engine.resolve(&fix, generation).await;
            });
        }));

        info!("Places engine following location updates");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Resolve places for `fix` and wait for the result.
    pub async fn refresh(&self, fix: &LocationFix) -> PlacesState {
        let generation = self.next_generation();
        self.resolve(fix, generation).await
    }

    /// Connectivity hint from the host. When offline, a cache miss is
    /// reported instead of attempting the network.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous != online {
            info!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Listen for state changes. The current state is delivered immediately.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PlacesState) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(listener)
    }

    pub fn state(&self) -> PlacesState {
        self.inner.bus.current().unwrap_or_default()
    }

    /// Stop following the tracker and drop every subscriber.
    pub fn shutdown(&self) {
        self.next_generation();
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(subscription);
        self.inner.bus.clear();
    }

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish_if_current(&self, generation: u64, state: PlacesState) {
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            self.inner.bus.publish(state);
        } else {
            debug!(generation, "Dropping superseded places result");
        }
    }

    async fn resolve(&self, fix: &LocationFix, generation: u64) -> PlacesState {
        let at = fix.coordinates();
        let previous = self.state();
        self.publish_if_current(
            generation,
            PlacesState {
                location: Some(at),
                loading: true,
                error: None,
                ..previous
            },
        );

        let cached = match self
            .inner
            .store
            .get_nearby_places(at, self.inner.settings.nearby_radius_m)
            .await
        {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Places cache unavailable");
                Vec::new()
            }
        };

        let state = if !cached.is_empty() {
            debug!(count = cached.len(), "Serving places from cache");
            PlacesState {
                location: Some(at),
                places: cached,
                loading: false,
                error: None,
                from_cache: true,
            }
        } else if !self.is_online() {
            PlacesState {
                location: Some(at),
                places: Vec::new(),
                loading: false,
                error: Some(OFFLINE_NO_CACHE.to_string()),
                from_cache: true,
            }
        } else {
            match self.fetch_remote(at).await {
                Ok((places, from_cache)) => PlacesState {
                    location: Some(at),
                    places,
                    loading: false,
                    error: None,
                    from_cache,
                },
                Err(e) => {
                    warn!(error = %e, "Places fetch failed");
                    let offline = e.downcast_ref::<ProxyError>().is_some_and(is_offline_error);
                    PlacesState {
                        location: Some(at),
                        places: Vec::new(),
                        loading: false,
                        error: Some(if offline {
                            OFFLINE_NO_CACHE.to_string()
                        } else {
                            format!("{:#}", e)
                        }),
                        from_cache: offline,
                    }
                }
            }
        };

        self.publish_if_current(generation, state.clone());
        state
    }

    async fn fetch_remote(&self, at: Coordinates) -> Result<(Vec<CachedPlace>, bool)> {
        let url = self.inner.settings.places_url(at);
        let resource = self
            .inner
            .fetcher
            .fetch(&url)
            .await
            .context("Could not load nearby places")?;

        let places = match normalize_bytes(&resource.body) {
            Ok(places) => places,
            Err(e) => {
                warn!(url = %url, error = %e, "Unusable places response");
                Vec::new()
            }
        };
        info!(count = places.len(), from_cache = resource.from_cache, "Places fetched");

        let cached = match self.inner.store.save_places(&places).await {
            Ok(saved) => saved,
            Err(e) => {
                // Still show the results; they just won't be there offline
                warn!(error = %e, "Failed to cache places");
                let now = Utc::now();
                places.into_iter().map(|p| CachedPlace::new(p, now)).collect()
            }
        };
        Ok((cached, resource.from_cache))
    }
}

// ============================================================================
// Tests
// ============================================================================
