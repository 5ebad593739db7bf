//! Canonical points of interest.
//!
//! Upstream place records come in several shapes; the places module
//! normalizes them into `Place`. A `Place` that has been written to the
//! durable store becomes a `CachedPlace`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Coordinates;
use crate::utils::format_age;

/// Fallback display name when a place carries neither a name nor an amenity.
const UNNAMED_PLACE: &str = "Health service";

/// Category of a health-related place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum PlaceType {
    Hospital,
    Clinic,
    Doctors,
    Veterinary,
    #[default]
    Default,
}

/// Categories requested from the places API.
pub const SEARCH_CATEGORIES: [PlaceType; 4] = [
    PlaceType::Hospital,
    PlaceType::Clinic,
    PlaceType::Doctors,
    PlaceType::Veterinary,
];

impl PlaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceType::Hospital => "hospital",
            PlaceType::Clinic => "clinic",
            PlaceType::Doctors => "doctors",
            PlaceType::Veterinary => "veterinary",
            PlaceType::Default => "default",
        }
    }

    /// Single-letter map marker label.
    pub fn marker_label(&self) -> char {
        match self {
            PlaceType::Hospital => 'H',
            PlaceType::Clinic => 'C',
            PlaceType::Doctors => 'D',
            PlaceType::Veterinary => 'V',
            PlaceType::Default => '?',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Place {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "type")]
    pub place_type: PlaceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Place {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or_else(|| self.tags.get("amenity").map(String::as_str))
            .unwrap_or(UNNAMED_PLACE)
    }

    pub fn address(&self) -> Option<&str> {
        self.tags
            .get("addr_full")
            .or_else(|| self.tags.get("address"))
            .map(String::as_str)
            .filter(|a| !a.is_empty())
    }
}

/// A place as persisted by the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CachedPlace {
    #[serde(flatten)]
    pub place: Place,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
}

impl CachedPlace {
    pub fn new(place: Place, saved_at: DateTime<Utc>) -> Self {
        Self { place, saved_at }
    }

    pub fn age_display(&self) -> String {
        format_age((Utc::now() - self.saved_at).num_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place_with_tags(tags: &[(&str, &str)]) -> Place {
        Place {
            id: "node/1".to_string(),
            lat: 0.0,
            lng: 0.0,
            place_type: PlaceType::Default,
            name: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut place = place_with_tags(&[("amenity", "clinic")]);
        assert_eq!(place.display_name(), "clinic");

        place.name = Some("Clinica Norte".to_string());
        assert_eq!(place.display_name(), "Clinica Norte");

        assert_eq!(place_with_tags(&[]).display_name(), "Health service");
    }

    #[test]
    fn test_address_prefers_full_address() {
        let place = place_with_tags(&[("addr_full", "Av. Siempre Viva 742"), ("address", "short")]);
        assert_eq!(place.address(), Some("Av. Siempre Viva 742"));
        assert_eq!(place_with_tags(&[("address", "")]).address(), None);
    }

    #[test]
    fn test_cached_place_flattens_place_fields() {
        let cached = CachedPlace::new(place_with_tags(&[]), Utc::now());
        let json = serde_json::to_value(&cached).unwrap();
        assert_eq!(json["id"], "node/1");
        assert_eq!(json["type"], "default");
        assert!(json.get("savedAt").is_some());
    }
}
