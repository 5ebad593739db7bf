//! Great-circle distance and bounding boxes.

use serde::{Deserialize, Serialize};

use crate::models::Coordinates;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Haversine distance between two points, in meters.
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Box extending `radius_m` from `center` in every direction, clamped to valid coordinates.
    pub fn around(center: Coordinates, radius_m: f64) -> Self {
        let radius_m = radius_m.max(0.0);
        let d_lat = radius_m / METERS_PER_DEGREE;
        // Guard the cosine near the poles
        let cos_lat = center.lat.to_radians().cos().max(0.01);
        let d_lng = radius_m / (METERS_PER_DEGREE * cos_lat);

        Self {
            south: (center.lat - d_lat).max(-90.0),
            west: (center.lng - d_lng).max(-180.0),
            north: (center.lat + d_lat).min(90.0),
            east: (center.lng + d_lng).min(180.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_for_same_point() {
        let p = Coordinates::new(-34.60, -58.38);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2 km on the mean sphere
        let d = haversine_m(Coordinates::new(0.0, 0.0), Coordinates::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 10.0, "distance was {}", d);
    }

    #[test]
    fn test_bounding_box_surrounds_center() {
        let center = Coordinates::new(-34.60, -58.38);
        let bbox = BoundingBox::around(center, 2000.0);
        assert!(bbox.south < center.lat && center.lat < bbox.north);
        assert!(bbox.west < center.lng && center.lng < bbox.east);
        // 2 km is well under 0.1 degrees
        assert!(bbox.south > -34.70);
    }

    #[test]
    fn test_bounding_box_is_clamped() {
        let bbox = BoundingBox::around(Coordinates::new(0.0, 0.0), 20_000_000.0);
        assert_eq!((bbox.south, bbox.west, bbox.north, bbox.east), (-90.0, -180.0, 90.0, 180.0));
    }
}
