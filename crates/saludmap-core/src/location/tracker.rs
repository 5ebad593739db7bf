use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PositionError, PositionOptions, PositionProvider, RawPosition, TrackerError};
use crate::events::{EventBus, Subscription};
use crate::models::LocationFix;
use crate::store::{DurableStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    Idle,
    Watching,
    Calibrating,
}

struct WatchHandle {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TrackerState {
    watch: Option<WatchHandle>,
    watch_generation: u64,
    calibrations: usize,
}

struct TrackerInner {
    provider: Arc<dyn PositionProvider>,
    store: Arc<DurableStore>,
    /// Holds the current fix and fans it out to subscribers.
    bus: EventBus<LocationFix>,
    /// Serializes accept -> persist -> publish so fixes publish in acceptance order.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<TrackerState>,
}

/// Owner of the single authoritative current location.
/// Clone is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct LocationTracker {
    inner: Arc<TrackerInner>,
}

impl LocationTracker {
    pub fn new(provider: Arc<dyn PositionProvider>, store: Arc<DurableStore>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                provider,
                store,
                bus: EventBus::new(),
                gate: tokio::sync::Mutex::new(()),
                state: Mutex::new(TrackerState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_location(&self) -> Option<LocationFix> {
        self.inner.bus.current()
    }

    pub fn status(&self) -> TrackerStatus {
        let state = self.state();
        if state.calibrations > 0 {
            TrackerStatus::Calibrating
        } else if state.watch.is_some() {
            TrackerStatus::Watching
        } else {
            TrackerStatus::Idle
        }
    }

    pub fn is_watching(&self) -> bool {
        self.state().watch.is_some()
    }

    /// Register a listener for location updates. If a current fix exists
    /// the listener receives it before this call returns.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LocationFix) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.bus.listener_count()
    }

    // ===== Explicit Requests =====

    /// Request one fresh high-accuracy GPS fix. A successful fix replaces
    /// any manual override.
    pub async fn get_current_position(&self) -> Result<LocationFix, TrackerError> {
        let raw = self
            .request_position(PositionOptions::ONE_SHOT)
            .await
            .inspect_err(|e| warn!(reason = e.reason(), error = %e, "GPS request failed"))?;

        let fix = LocationFix::gps(raw.lat, raw.lng, raw.accuracy);
        Ok(self.commit(fix).await?)
    }

    /// Take one fresh high-accuracy fix and record it as calibrated.
    pub async fn calibrate_position(&self) -> Result<LocationFix, TrackerError> {
        let _calibrating = CalibrationGuard::enter(self);
        info!("Calibrating position");

        let raw = self
            .request_position(PositionOptions::CALIBRATION)
            .await
            .inspect_err(|e| warn!(reason = e.reason(), error = %e, "Calibration failed"))?;

        let fix = LocationFix::calibrated(raw.lat, raw.lng, raw.accuracy);
        Ok(self.commit(fix).await?)
    }

    /// Pin the current location. Manual fixes are never replaced by the watch loop.
    pub async fn set_manual_location(&self, lat: f64, lng: f64) -> Result<LocationFix, TrackerError> {
        info!(lat, lng, "Manual location set");
        Ok(self.commit(LocationFix::manual(lat, lng)).await?)
    }

    /// Restore the most recent persisted fix as current, without writing it
    /// again. Returns the restored fix; `None` when nothing is stored or a
    /// fix is already current.
    pub async fn load_last_known_location(&self) -> Result<Option<LocationFix>, StorageError> {
        let _gate = self.inner.gate.lock().await;
        if self.current_location().is_some() {
            debug!("Current location already set, not restoring");
            return Ok(None);
        }

        let last = self.inner.store.get_last_location().await?;
        if let Some(ref fix) = last {
            debug!(source = ?fix.source, "Restored last known location");
            self.inner.bus.publish(fix.clone());
        }
        Ok(last)
    }

    async fn request_position(&self, options: PositionOptions) -> Result<RawPosition, PositionError> {
        match tokio::time::timeout(options.timeout, self.inner.provider.current_position(options)).await {
            Ok(result) => result,
            Err(_) => Err(PositionError::Timeout),
        }
    }

    /// Persist then publish a fix from an explicit request. Nothing is
    /// published if persisting fails.
    async fn commit(&self, fix: LocationFix) -> Result<LocationFix, StorageError> {
        let _gate = self.inner.gate.lock().await;
        self.inner.store.save_location(&fix).await?;
        self.inner.bus.publish(fix.clone());
        Ok(fix)
    }

    // ===== Continuous Watch =====

    /// Start the continuous watch loop. No-op when already watching.
    /// Must be called from within a tokio runtime.
    pub fn start_watching(&self) {
        let mut state = self.state();
        if state.watch.is_some() {
            return;
        }

        state.watch_generation += 1;
        let generation = state.watch_generation;
        let cancel = CancellationToken::new();
        let stream = self.inner.provider.watch_position(PositionOptions::WATCH);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(watch_loop(weak, stream, generation, cancel.clone()));

        state.watch = Some(WatchHandle { generation, cancel });
        info!(generation, "Location watch started");
    }

    /// Stop the watch loop. No fix from the stopped watch reaches
    /// subscribers afterwards, even one already in flight.
    pub fn stop_watching(&self) {
        let handle = self.state().watch.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            info!(generation = handle.generation, "Location watch stopped");
        }
    }

    /// Stop watching, drop every subscriber and forget the current fix.
    pub fn shutdown(&self) {
        self.stop_watching();
        self.inner.bus.clear();
    }

    fn watch_is_live(&self, generation: u64) -> bool {
        self.state().watch.as_ref().map(|w| w.generation) == Some(generation)
    }

    async fn accept_watched(&self, raw: RawPosition, generation: u64) {
        let _gate = self.inner.gate.lock().await;

        if !self.watch_is_live(generation) {
            debug!(generation, "Dropping fix from stopped watch");
            return;
        }
        if self.current_location().is_some_and(|c| c.is_manual()) {
            debug!("Ignoring GPS fix while a manual location is set");
            return;
        }

        let fix = LocationFix::gps(raw.lat, raw.lng, raw.accuracy);
        if let Err(e) = self.inner.store.save_location(&fix).await {
            // No caller to return this to; keep the live location flowing
            warn!(error = %e, "Failed to persist watched location");
        }

        // Stopped while persisting
        if !self.watch_is_live(generation) {
            debug!(generation, "Dropping fix from stopped watch");
            return;
        }
        self.inner.bus.publish(fix);
    }
}

async fn watch_loop(
    tracker: Weak<TrackerInner>,
    mut stream: super::PositionStream,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(raw)) => {
                    let Some(inner) = tracker.upgrade() else { break };
                    LocationTracker { inner }.accept_watched(raw, generation).await;
                }
                Some(Err(e)) => warn!(reason = e.reason(), error = %e, "Error in watch position"),
                None => {
                    debug!(generation, "Position watch stream ended");
                    break;
                }
            }
        }
    }
}

/// Marks the tracker as calibrating for the guard's lifetime.
struct CalibrationGuard<'a> {
    tracker: &'a LocationTracker,
}

impl<'a> CalibrationGuard<'a> {
    fn enter(tracker: &'a LocationTracker) -> Self {
        tracker.state().calibrations += 1;
        Self { tracker }
    }
}

impl Drop for CalibrationGuard<'_> {
    fn drop(&mut self) {
        self.tracker.state().calibrations -= 1;
    }
}

// ============================================================================
// Tests
// ============================================================================
