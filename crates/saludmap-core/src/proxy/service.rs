use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CachePolicy, ProxyError, RoutingTable, Transport, TransportError};
use crate::models::{CacheEntry, Partition};
use crate::store::{DurableStore, StorageError};

/// Queue depth for requests waiting on the proxy task.
const REQUEST_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyLifecycle {
    Installed,
    Active,
    TornDown,
}

/// A resource as answered by the proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// True when the network was not used or failed and the body came from the cache.
    pub from_cache: bool,
    /// When the cached copy was stored. None for fresh network responses.
    pub stored_at: Option<DateTime<Utc>>,
}

impl Resource {
    fn from_entry(entry: CacheEntry) -> Self {
        Self {
            url: entry.key,
            content_type: entry.content_type,
            body: entry.payload,
            from_cache: true,
            stored_at: Some(entry.stored_at),
        }
    }
}

/// Anything that can answer a resource request. Implemented by the proxy
/// itself and by its channel handle.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Resource, ProxyError>;
}

/// Interception layer that applies a per-route caching policy on top of a
/// [`Transport`] and writes through the store's resource partitions.
pub struct ResourceCacheProxy {
    store: Arc<DurableStore>,
    transport: Arc<dyn Transport>,
    routes: RoutingTable,
    lifecycle: RwLock<ProxyLifecycle>,
}

impl ResourceCacheProxy {
    /// Prepare the cache partitions. Interception starts at [`activate`](Self::activate).
    pub async fn install(
        store: Arc<DurableStore>,
        transport: Arc<dyn Transport>,
        routes: RoutingTable,
    ) -> Result<Self, StorageError> {
        store.ensure_partitions().await?;
        info!(routes = routes.routes().len(), "Resource proxy installed");
        Ok(Self {
            store,
            transport,
            routes,
            lifecycle: RwLock::new(ProxyLifecycle::Installed),
        })
    }

    pub fn activate(&self) {
        self.set_lifecycle(ProxyLifecycle::Active);
    }

    pub fn teardown(&self) {
        self.set_lifecycle(ProxyLifecycle::TornDown);
    }

    pub fn lifecycle(&self) -> ProxyLifecycle {
        match self.lifecycle.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_lifecycle(&self, next: ProxyLifecycle) {
        let mut state = match self.lifecycle.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state == ProxyLifecycle::TornDown {
            return;
        }
        debug!(from = ?*state, to = ?next, "Proxy lifecycle change");
        *state = next;
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Answer a request according to its route. Only an active proxy
    /// intercepts; otherwise every request passes through.
    pub async fn handle(&self, url: &str) -> Result<Resource, ProxyError> {
        let policy = if self.lifecycle() == ProxyLifecycle::Active {
            self.routes.classify(url)
        } else {
            CachePolicy::PassThrough
        };

        match policy {
            CachePolicy::NetworkFirst(partition) => self.network_first(url, partition).await,
            CachePolicy::CacheFirst(partition) => self.cache_first(url, partition).await,
            CachePolicy::PassThrough => self.pass_through(url).await,
        }
    }

    async fn network_first(&self, url: &str, partition: Partition) -> Result<Resource, ProxyError> {
        match self.transport.fetch(url).await {
            Ok(fetched) => {
                let entry = CacheEntry::new(url, partition, fetched.content_type, fetched.body);
                self.write_through(&entry).await;
                Ok(Resource {
                    url: url.to_string(),
                    content_type: entry.content_type,
                    body: entry.payload,
                    from_cache: false,
                    stored_at: None,
                })
            }
            Err(e) => {
                debug!(url, error = %e, "Network failed, trying cache");
                match self.cached(url, partition).await {
                    Some(entry) => Ok(Resource::from_entry(entry)),
                    None => Err(ProxyError::ResourceUnavailable {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    async fn cache_first(&self, url: &str, partition: Partition) -> Result<Resource, ProxyError> {
        if let Some(entry) = self.cached(url, partition).await {
            return Ok(Resource::from_entry(entry));
        }

        let fetched = self
            .transport
            .fetch(url)
            .await
            .map_err(|e| ProxyError::ResourceUnavailable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let entry = CacheEntry::new(url, partition, fetched.content_type, fetched.body);
        self.write_through(&entry).await;
        Ok(Resource {
            url: url.to_string(),
            content_type: entry.content_type,
            body: entry.payload,
            from_cache: false,
            stored_at: None,
        })
    }

    async fn pass_through(&self, url: &str) -> Result<Resource, ProxyError> {
        let fetched = self.transport.fetch(url).await.map_err(|source| ProxyError::Network {
            url: url.to_string(),
            source,
        })?;
        Ok(Resource {
            url: url.to_string(),
            content_type: fetched.content_type,
            body: fetched.body,
            from_cache: false,
            stored_at: None,
        })
    }

    /// A store read failure is treated as a cache miss.
    async fn cached(&self, url: &str, partition: Partition) -> Option<CacheEntry> {
        match self.store.get_resource(partition, url).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url, error = %e, "Failed to read cached resource");
                None
            }
        }
    }

    async fn write_through(&self, entry: &CacheEntry) {
        if let Err(e) = self.store.put_resource(entry).await {
            warn!(url = %entry.key, error = %e, "Failed to cache resource");
        }
    }
}

#[async_trait]
impl ResourceFetcher for ResourceCacheProxy {
    async fn fetch(&self, url: &str) -> Result<Resource, ProxyError> {
        self.handle(url).await
    }
}

// ===== Proxy Task =====

struct ProxyRequest {
    url: String,
    reply: oneshot::Sender<Result<Resource, ProxyError>>,
}

/// Cloneable client side of a running proxy task.
#[derive(Clone)]
pub struct ProxyHandle {
    tx: mpsc::Sender<ProxyRequest>,
}

#[async_trait]
impl ResourceFetcher for ProxyHandle {
    async fn fetch(&self, url: &str) -> Result<Resource, ProxyError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ProxyRequest {
                url: url.to_string(),
                reply,
            })
            .await
            .map_err(|_| ProxyError::Stopped)?;
        rx.await.map_err(|_| ProxyError::Stopped)?
    }
}

/// Runs a proxy on its own task, decoupled from the caller's work.
pub struct ProxyService;

impl ProxyService {
    /// Spawn the proxy task. It exits once every [`ProxyHandle`] is dropped.
    pub fn spawn(proxy: Arc<ResourceCacheProxy>) -> (ProxyHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ProxyRequest>(REQUEST_QUEUE_SIZE);

        let task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let proxy = proxy.clone();
                // Each request resolves independently so a slow tile never blocks the API
                tokio::spawn(async move {
                    let result = proxy.handle(&request.url).await;
                    // Requester may have given up; nothing to do then
                    let _ = request.reply.send(result);
                });
            }
            proxy.teardown();
            debug!("Proxy task finished");
        });

        (ProxyHandle { tx }, task)
    }
}

/// Whether the error means the network could not be reached and nothing was cached.
pub fn is_offline_error(error: &ProxyError) -> bool {
    matches!(
        error,
        ProxyError::ResourceUnavailable { .. }
            | ProxyError::Network {
                source: TransportError::Unreachable(_) | TransportError::Network(_),
                ..
            }
    )
}
