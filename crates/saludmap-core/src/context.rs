//! Wiring for a running saludmap instance.
//!
//! `AppContext::init` opens the store, installs and activates the resource
//! proxy on its own task, restores the last known location, and starts the
//! places engine. `shutdown` takes everything down in reverse.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::location::{LocationTracker, PositionProvider};
use crate::places::{PlacesSettings, PlacesSyncEngine};
use crate::prefetch::AreaPrefetcher;
use crate::proxy::{ProxyHandle, ProxyService, ResourceCacheProxy, ResourceFetcher, RoutingTable, Transport};
use crate::store::DurableStore;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<DurableStore>,
    pub tracker: LocationTracker,
    pub proxy: Arc<ResourceCacheProxy>,
    /// Client side of the proxy task. Every network request goes through it.
    pub fetcher: ProxyHandle,
    pub places: PlacesSyncEngine,
    pub prefetcher: AreaPrefetcher,
    proxy_task: JoinHandle<()>,
}

impl AppContext {
    /// Must be called from within a tokio runtime.
    pub async fn init(
        config: Config,
        provider: Arc<dyn PositionProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let store = Arc::new(
            DurableStore::open(&data_dir)
                .await
                .with_context(|| format!("Failed to open store at {}", data_dir.display()))?,
        );

        let proxy = Arc::new(
            ResourceCacheProxy::install(Arc::clone(&store), transport, RoutingTable::from_config(&config))
                .await
                .context("Failed to install resource proxy")?,
        );
        proxy.activate();
        let (fetcher, proxy_task) = ProxyService::spawn(Arc::clone(&proxy));
        let shared_fetcher: Arc<dyn ResourceFetcher> = Arc::new(fetcher.clone());

        let tracker = LocationTracker::new(provider, Arc::clone(&store));
        let places = PlacesSyncEngine::new(
            tracker.clone(),
            Arc::clone(&store),
            Arc::clone(&shared_fetcher),
            PlacesSettings::from_config(&config),
        );
        // Before initialize, so the restored location never reaches the network
        places.set_online(!config.offline);
        places.initialize()?;

        // A broken location file only costs the restored position
        match tracker.load_last_known_location().await {
            Ok(Some(fix)) => info!(source = fix.source.label(), "Last known location restored"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not restore last known location"),
        }

        let prefetcher = AreaPrefetcher::from_config(shared_fetcher, &config);

        info!(data_dir = %data_dir.display(), "saludmap context ready");
        Ok(Self {
            config,
            store,
            tracker,
            proxy,
            fetcher,
            places,
            prefetcher,
            proxy_task,
        })
    }

    pub async fn shutdown(self) {
        self.places.shutdown();
        self.tracker.shutdown();
        self.proxy.teardown();
        // Clones of the handle live on in the engine and prefetcher, so the
        // task would not see its channel close on its own
        self.proxy_task.abort();
        let _ = self.proxy_task.await;
        info!("saludmap context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaceType;
    use crate::proxy::ProxyLifecycle;
    use crate::testing::{MockTransport, ScriptedProvider};
    use std::time::Duration;

    #[tokio::test]
    async fn test_places_flow_through_the_proxy_task() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            api_base_url: "http://api.test".to_string(),
            data_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let transport = Arc::new(MockTransport::new());
        transport.insert_prefix(
            "http://api.test/places",
            "application/json",
            br#"[{"id":"p1","lat":-34.601,"lng":-58.381,"tags":{"amenity":"hospital"}}]"#.to_vec(),
        );

        let ctx = AppContext::init(config, Arc::new(ScriptedProvider::new()), transport)
            .await
            .unwrap();
        assert_eq!(ctx.proxy.lifecycle(), ProxyLifecycle::Active);
        assert_eq!(ctx.tracker.current_location(), None);

        ctx.tracker.set_manual_location(-34.60, -58.38).await.unwrap();
        let mut state = ctx.places.state();
        for _ in 0..200 {
            if !state.places.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = ctx.places.state();
        }
        assert_eq!(state.places.len(), 1);
        assert_eq!(state.places[0].place.place_type, PlaceType::Hospital);

        let proxy = Arc::clone(&ctx.proxy);
        ctx.shutdown().await;
        assert_eq!(proxy.lifecycle(), ProxyLifecycle::TornDown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_offline_start_makes_no_network_requests() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            api_base_url: "http://api.test".to_string(),
            data_dir: Some(dir.path().to_path_buf()),
            offline: true,
            ..Config::default()
        };
        {
            let store = DurableStore::open(dir.path()).await.unwrap();
            store
                .save_location(&crate::models::LocationFix::manual(-34.60, -58.38))
                .await
                .unwrap();
        }
        let transport = Arc::new(MockTransport::new());

        let ctx = AppContext::init(config, Arc::new(ScriptedProvider::new()), transport.clone())
            .await
            .unwrap();
        assert!(!ctx.places.is_online());
        let mut state = ctx.places.state();
        for _ in 0..200 {
            if state.error.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            state = ctx.places.state();
        }
        assert!(state.error.is_some());
        assert!(state.places.is_empty());
        assert_eq!(transport.calls(), 0);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_restores_last_location() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        {
            let store = DurableStore::open(dir.path()).await.unwrap();
            store
                .save_location(&crate::models::LocationFix::manual(1.5, 2.5))
                .await
                .unwrap();
        }

        let ctx = AppContext::init(config, Arc::new(ScriptedProvider::new()), Arc::new(MockTransport::new()))
            .await
            .unwrap();
        let current = ctx.tracker.current_location().unwrap();
        assert_eq!((current.lat, current.lng), (1.5, 2.5));
        ctx.shutdown().await;
    }
}
