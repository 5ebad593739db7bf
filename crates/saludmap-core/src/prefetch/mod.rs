//! Area prefetching.
//!
//! Populates the tile cache for a region ahead of losing connectivity. The
//! prefetcher only enumerates tiles and issues requests; caching itself is
//! the proxy's network-first write-through, so a prefetched tile is served
//! offline exactly like one the map loaded earlier.

pub mod tiles;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::geo::BoundingBox;
use crate::models::Coordinates;
use crate::proxy::ResourceFetcher;

pub use tiles::{tiles_in_bbox, TileCoord, MAX_TILE_ZOOM};

/// Upper bound on tiles in one plan. A 1000 tile area is already several
/// tens of megabytes and well past fair use of public tile servers.
pub const MAX_PREFETCH_TILES: usize = 1000;

pub const DEFAULT_PREFETCH_ZOOMS: [u8; 3] = [13, 14, 15];

/// Maximum concurrent tile requests.
pub const DEFAULT_PREFETCH_CONCURRENCY: usize = 4;

/// Tiles selected for download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchPlan {
    pub tiles: Vec<TileCoord>,
    /// True when the area needed more than [`MAX_PREFETCH_TILES`] tiles.
    pub truncated: bool,
}

impl PrefetchPlan {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Outcome of a download run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefetchReport {
    pub total: usize,
    pub fetched: Vec<TileCoord>,
    pub failed: Vec<(TileCoord, String)>,
    /// Units never started because the run was cancelled.
    pub pending: Vec<TileCoord>,
    pub cancelled: bool,
}

impl PrefetchReport {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.failed.is_empty()
    }

    /// A plan covering the units this run did not start.
    pub fn resume_plan(&self) -> PrefetchPlan {
        PrefetchPlan {
            tiles: self.pending.clone(),
            truncated: false,
        }
    }
}

enum UnitOutcome {
    Fetched,
    Failed(String),
    Skipped,
}

pub struct AreaPrefetcher {
    fetcher: Arc<dyn ResourceFetcher>,
    tile_template: String,
    zooms: Vec<u8>,
    concurrency: usize,
}

impl AreaPrefetcher {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, tile_template: impl Into<String>) -> Self {
        Self {
            fetcher,
            tile_template: tile_template.into(),
            zooms: DEFAULT_PREFETCH_ZOOMS.to_vec(),
            concurrency: DEFAULT_PREFETCH_CONCURRENCY,
        }
    }

    pub fn from_config(fetcher: Arc<dyn ResourceFetcher>, config: &Config) -> Self {
        Self::new(fetcher, config.tile_url_template.clone())
            .with_zooms(config.prefetch_zooms.clone())
            .with_concurrency(config.prefetch_concurrency)
    }

    /// Zooms past [`MAX_TILE_ZOOM`] are dropped.
    pub fn with_zooms(mut self, zooms: Vec<u8>) -> Self {
        let (valid, rejected): (Vec<u8>, Vec<u8>) = zooms.into_iter().partition(|z| *z <= MAX_TILE_ZOOM);
        if !rejected.is_empty() {
            warn!(?rejected, max = MAX_TILE_ZOOM, "Ignoring unsupported prefetch zooms");
        }
        self.zooms = valid;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enumerate the tiles covering `radius_m` around `center`, lowest zoom first.
    pub fn plan(&self, center: Coordinates, radius_m: f64) -> PrefetchPlan {
        let bbox = BoundingBox::around(center, radius_m);
        let mut zooms = self.zooms.clone();
        zooms.sort_unstable();
        zooms.dedup();

        let mut plan = PrefetchPlan::default();
        for z in zooms {
            let remaining = MAX_PREFETCH_TILES - plan.tiles.len();
            let mut tiles = tiles_in_bbox(&bbox, z);
            plan.tiles.extend(tiles.by_ref().take(remaining));
            if tiles.next().is_some() {
                plan.truncated = true;
                break;
            }
        }

        if plan.truncated {
            warn!(limit = MAX_PREFETCH_TILES, radius_m, "Prefetch area truncated");
        }
        debug!(tiles = plan.len(), "Prefetch plan ready");
        plan
    }

    /// Download every tile in `plan`. `progress` receives the completed
    /// percentage in [0, 100] after each unit. Cancellation is honoured
    /// before each unit starts; units in flight finish normally.
    pub async fn download<F>(
        &self,
        plan: &PrefetchPlan,
        progress: F,
        cancel: &CancellationToken,
    ) -> PrefetchReport
    where
        F: Fn(f64) + Send + Sync,
    {
        let total = plan.len();
        let mut report = PrefetchReport {
            total,
            ..PrefetchReport::default()
        };
        if total == 0 {
            progress(100.0);
            return report;
        }

        let mut completed = 0usize;
        let mut results = stream::iter(plan.tiles.iter().copied())
            .map(|tile| {
                let fetcher = Arc::clone(&self.fetcher);
                let url = tile.url_for(&self.tile_template);
                async move {
                    if cancel.is_cancelled() {
                        return (tile, UnitOutcome::Skipped);
                    }
                    match fetcher.fetch(&url).await {
                        Ok(_) => (tile, UnitOutcome::Fetched),
                        Err(e) => (tile, UnitOutcome::Failed(e.to_string())),
                    }
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((tile, outcome)) = results.next().await {
            match outcome {
                UnitOutcome::Skipped => {
                    report.pending.push(tile);
                    continue;
                }
                UnitOutcome::Fetched => report.fetched.push(tile),
                UnitOutcome::Failed(reason) => {
                    warn!(tile = %tile, error = %reason, "Tile prefetch failed");
                    report.failed.push((tile, reason));
                }
            }
            completed += 1;
            progress(completed as f64 / total as f64 * 100.0);
        }

        report.pending.sort();
        report.cancelled = !report.pending.is_empty();
        info!(
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            pending = report.pending.len(),
            "Prefetch finished"
        );
        report
    }

    /// Plan and download the tiles around `center`.
    pub async fn download_tiles_for_area<F>(
        &self,
        center: Coordinates,
        radius_m: f64,
        progress: F,
        cancel: &CancellationToken,
    ) -> PrefetchReport
    where
        F: Fn(f64) + Send + Sync,
    {
        let plan = self.plan(center, radius_m);
        self.download(&plan, progress, cancel).await
    }
}

// ============================================================================
// Tests
// ============================================================================
