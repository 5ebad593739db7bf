//! Position samples and their provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bare latitude/longitude pair in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Where a fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum FixSource {
    Gps,
    Manual,
    Calibrated,
}

impl FixSource {
    pub fn label(&self) -> &'static str {
        match self {
            FixSource::Gps => "GPS",
            FixSource::Manual => "Manual",
            FixSource::Calibrated => "Calibrated",
        }
    }
}

/// A single resolved position with provenance and uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    /// Radius of uncertainty in meters. Manual fixes carry none.
    pub accuracy: Option<f64>,
    pub source: FixSource,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub timestamp: DateTime<Utc>,
    /// Number of samples folded into a calibrated fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<u32>,
}

impl LocationFix {
    fn new(lat: f64, lng: f64, accuracy: Option<f64>, source: FixSource) -> Self {
        Self {
            lat,
            lng,
            accuracy,
            source,
            timestamp: super::now_millis(),
            samples: None,
        }
    }

    pub fn gps(lat: f64, lng: f64, accuracy: Option<f64>) -> Self {
        Self::new(lat, lng, accuracy, FixSource::Gps)
    }

    pub fn manual(lat: f64, lng: f64) -> Self {
        Self::new(lat, lng, None, FixSource::Manual)
    }

    pub fn calibrated(lat: f64, lng: f64, accuracy: Option<f64>) -> Self {
        Self {
            samples: Some(1),
            ..Self::new(lat, lng, accuracy, FixSource::Calibrated)
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }

    pub fn is_manual(&self) -> bool {
        self.source == FixSource::Manual
    }

    /// Accuracy rounded to whole meters, or "n/a" when unknown.
    pub fn accuracy_display(&self) -> String {
        match self.accuracy {
            Some(meters) => format!("{}m", meters.round() as i64),
            None => "n/a".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_serializes_timestamp_as_millis() {
        let mut fix = LocationFix::gps(-34.6, -58.38, Some(12.0));
        fix.timestamp = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

        let json = serde_json::to_value(&fix).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_123i64);
        assert_eq!(json["source"], "gps");
        assert!(json.get("samples").is_none());

        let back: LocationFix = serde_json::from_value(json).unwrap();
        assert_eq!(back, fix);
    }

    #[test]
    fn test_manual_fix_has_no_accuracy() {
        let fix = LocationFix::manual(1.0, 2.0);
        assert!(fix.is_manual());
        assert_eq!(fix.accuracy, None);
        assert_eq!(fix.accuracy_display(), "n/a");
    }

    #[test]
    fn test_new_fix_has_millisecond_precision() {
        let fix = LocationFix::gps(1.0, 2.0, None);
        assert_eq!(fix.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);
        let json = serde_json::to_string(&fix).unwrap();
        assert_eq!(serde_json::from_str::<LocationFix>(&json).unwrap(), fix);
    }

    #[test]
    fn test_calibrated_fix_counts_one_sample() {
        let fix = LocationFix::calibrated(1.0, 2.0, Some(7.6));
        assert_eq!(fix.source, FixSource::Calibrated);
        assert_eq!(fix.samples, Some(1));
        assert_eq!(fix.accuracy_display(), "8m");
    }

    #[test]
    fn test_coordinates_validity() {
        assert!(Coordinates::new(-34.6, -58.38).is_valid());
        assert!(!Coordinates::new(91.0, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, f64::NAN).is_valid());
    }
}
