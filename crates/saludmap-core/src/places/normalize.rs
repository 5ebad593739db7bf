//! Normalization of places API payloads.
//!
//! The places endpoint answers in one of four shapes:
//! - a bare array of records
//! - `{"lugares": [...]}` (the saludmap backend)
//! - `{"elements": [...]}` (Overpass)
//! - `{"features": [...]}` (GeoJSON)
//!
//! Records themselves vary too. Coordinates are taken as a pair from the
//! first source that has both halves: direct `lat` + `lng`/`lon`, then
//! `center {lat, lon}`, then `geometry.coordinates [lng, lat]`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::place_type_for;
use crate::models::{Coordinates, Place};

#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("Unrecognized places payload: {0}")]
    UnrecognizedShape(String),

    #[error("Invalid JSON in places payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Accepted top-level shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlacesPayload {
    Bare(Vec<Value>),
    Wrapped {
        #[serde(default)]
        lugares: Option<Vec<Value>>,
        #[serde(default)]
        elements: Option<Vec<Value>>,
        #[serde(default)]
        features: Option<Vec<Value>>,
    },
}

impl PlacesPayload {
    fn into_records(self) -> Option<Vec<Value>> {
        match self {
            PlacesPayload::Bare(records) => Some(records),
            PlacesPayload::Wrapped {
                lugares,
                elements,
                features,
            } => lugares.or(elements).or(features),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCenter {
    lat: Option<Value>,
    lon: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeometry {
    #[serde(default)]
    coordinates: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPlace {
    id: Option<Value>,
    #[serde(rename = "_id")]
    object_id: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<Value>,
    lat: Option<Value>,
    lng: Option<Value>,
    lon: Option<Value>,
    center: Option<RawCenter>,
    geometry: Option<RawGeometry>,
    tags: Option<Map<String, Value>>,
    properties: Option<Map<String, Value>>,
    name: Option<Value>,
}

/// Numbers, or strings holding numbers.
fn number(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl RawPlace {
    fn coordinates(&self) -> Option<Coordinates> {
        let lng = number(&self.lng).or_else(|| number(&self.lon));
        if let (Some(lat), Some(lng)) = (number(&self.lat), lng) {
            return Some(Coordinates::new(lat, lng));
        }
        if let Some(ref center) = self.center {
            if let (Some(lat), Some(lng)) = (number(&center.lat), number(&center.lon)) {
                return Some(Coordinates::new(lat, lng));
            }
        }
        let coords = &self.geometry.as_ref()?.coordinates;
        // GeoJSON order is [lng, lat]
        let lng = number(&coords.first().cloned())?;
        let lat = number(&coords.get(1).cloned())?;
        Some(Coordinates::new(lat, lng))
    }

    fn tags(&self) -> BTreeMap<String, String> {
        self.tags
            .as_ref()
            .or(self.properties.as_ref())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| text(v).map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `node/123` for Overpass elements, the record's own id otherwise, and
    /// a position-derived id as the last resort.
    fn id(&self, at: Coordinates) -> String {
        let own_id = self
            .id
            .as_ref()
            .and_then(text)
            .or_else(|| self.object_id.as_ref().and_then(text));
        let kind = self.kind.as_ref().and_then(|k| k.as_str());

        match (kind, own_id) {
            (Some(kind @ ("node" | "way" | "relation")), Some(id)) => format!("{}/{}", kind, id),
            (_, Some(id)) => id,
            (_, None) => format!("pos:{:.6},{:.6}", at.lat, at.lng),
        }
    }

    fn into_place(self) -> Option<Place> {
        let at = self.coordinates().filter(Coordinates::is_valid)?;
        let tags = self.tags();
        let name = tags
            .get("name")
            .cloned()
            .or_else(|| self.name.as_ref().and_then(text))
            .filter(|n| !n.trim().is_empty());

        Some(Place {
            id: self.id(at),
            lat: at.lat,
            lng: at.lng,
            place_type: place_type_for(&tags),
            name,
            tags,
        })
    }
}

/// Validate the payload shape and normalize every record with usable
/// coordinates. Records that are not objects or lack coordinates are skipped.
pub fn try_normalize(payload: &Value) -> Result<Vec<Place>, NormalizationError> {
    let records = PlacesPayload::deserialize(payload)
        .ok()
        .and_then(PlacesPayload::into_records)
        .ok_or_else(|| NormalizationError::UnrecognizedShape(describe(payload)))?;

    let total = records.len();
    let places: Vec<Place> = records
        .into_iter()
        .filter_map(|record| RawPlace::deserialize(record).ok())
        .filter_map(RawPlace::into_place)
        .collect();

    if places.len() < total {
        debug!(total, kept = places.len(), "Skipped places without usable coordinates");
    }
    Ok(places)
}

/// Like [`try_normalize`], but an unrecognized payload yields no places.
pub fn normalize_api_response(payload: &Value) -> Vec<Place> {
    try_normalize(payload).unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring places payload");
        Vec::new()
    })
}

/// Parse and normalize a raw response body.
pub fn normalize_bytes(body: &[u8]) -> Result<Vec<Place>, NormalizationError> {
    let payload: Value = serde_json::from_slice(body)?;
    try_normalize(&payload)
}

fn describe(payload: &Value) -> String {
    match payload {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).take(5).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaceType;
    use serde_json::json;

    #[test]
    fn test_overpass_elements() {
        let payload = json!({
            "elements": [
                {"type": "node", "id": 42, "lat": -34.601, "lon": -58.381,
                 "tags": {"amenity": "hospital", "name": "Hospital Central"}},
                {"type": "way", "id": 7, "center": {"lat": -34.7, "lon": -58.5},
                 "tags": {"amenity": "clinic"}}
            ]
        });
        let places = try_normalize(&payload).unwrap();
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].id, "node/42");
        assert_eq!((places[0].lat, places[0].lng), (-34.601, -58.381));
        assert_eq!(places[0].place_type, PlaceType::Hospital);
        assert_eq!(places[0].name.as_deref(), Some("Hospital Central"));
        assert_eq!(places[1].id, "way/7");
        assert_eq!((places[1].lat, places[1].lng), (-34.7, -58.5));
        assert_eq!(places[1].place_type, PlaceType::Clinic);
    }

    #[test]
    fn test_geojson_features_are_lng_first() {
        let payload = json!({
            "features": [{
                "type": "Feature",
                "id": "node/9",
                "geometry": {"type": "Point", "coordinates": [-58.38, -34.60]},
                "properties": {"healthcare": "veterinary", "name": "Vet Norte"}
            }]
        });
        let places = try_normalize(&payload).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!((places[0].lat, places[0].lng), (-34.60, -58.38));
        assert_eq!(places[0].id, "node/9");
        assert_eq!(places[0].place_type, PlaceType::Veterinary);
    }

    #[test]
    fn test_lugares_and_bare_shapes() {
        let record = json!({"_id": "abc", "lat": "-34.5", "lng": -58.4, "name": "Consultorio",
                            "tags": {"amenity": "doctors", "beds": 12}});
        let wrapped = try_normalize(&json!({ "lugares": [record.clone()] })).unwrap();
        let bare = try_normalize(&json!([record])).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(bare[0].id, "abc");
        assert_eq!(bare[0].lat, -34.5);
        assert_eq!(bare[0].place_type, PlaceType::Doctors);
        assert_eq!(bare[0].name.as_deref(), Some("Consultorio"));
        assert_eq!(bare[0].tags.get("beds").map(String::as_str), Some("12"));
    }

    #[test]
    fn test_records_without_coordinates_are_skipped() {
        let payload = json!([
            {"id": 1, "tags": {"amenity": "hospital"}},
            {"id": 2, "lat": -34.6},
            "not an object",
            {"lat": -34.6, "lng": -58.4}
        ]);
        let places = try_normalize(&payload).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].id, "pos:-34.600000,-58.400000");
        assert_eq!(places[0].place_type, PlaceType::Default);
    }

    #[test]
    fn test_unrecognized_shapes() {
        for payload in [json!({}), json!({"results": []}), json!("hello"), json!(null), json!({"elements": 3})] {
            assert!(matches!(try_normalize(&payload), Err(NormalizationError::UnrecognizedShape(_))));
            assert!(normalize_api_response(&payload).is_empty());
        }
        assert!(matches!(normalize_bytes(b"<html>"), Err(NormalizationError::InvalidJson(_))));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let payload = json!({"elements": [
            {"type": "node", "id": 1, "lat": 1.0, "lon": 2.0, "tags": {"name": "Clínica Sur"}},
            {"lat": 3.0, "lng": 4.0}
        ]});
        assert_eq!(normalize_api_response(&payload), normalize_api_response(&payload));
    }
}
