use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::PositionError;

/// Parameters for a positioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the backend may return. Zero forces a fresh fix.
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// One-shot request: fresh high-accuracy fix within 15 seconds.
    pub const ONE_SHOT: Self = Self {
        high_accuracy: true,
        timeout: Duration::from_secs(15),
        maximum_age: Duration::ZERO,
    };

    /// Calibration: fresh high-accuracy fix within 10 seconds.
    pub const CALIBRATION: Self = Self {
        high_accuracy: true,
        timeout: Duration::from_secs(10),
        maximum_age: Duration::ZERO,
    };

    /// Continuous watch. Accepting 10 second old fixes limits update churn.
    pub const WATCH: Self = Self {
        high_accuracy: true,
        timeout: Duration::from_secs(20),
        maximum_age: Duration::from_secs(10),
    };
}

/// A position as reported by the backend, before the tracker labels it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPosition {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
}

pub type PositionStream = BoxStream<'static, Result<RawPosition, PositionError>>;

/// Positioning backend (GNSS receiver, OS location service, IP lookup).
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Request a single fix.
    async fn current_position(&self, options: PositionOptions) -> Result<RawPosition, PositionError>;

    /// Start a continuous subscription. Dropping the stream ends it.
    fn watch_position(&self, options: PositionOptions) -> PositionStream;
}
