use std::collections::BTreeMap;

use crate::models::PlaceType;
use crate::utils::contains_ignore_case;

/// Derive a category from `amenity` (or `healthcare` when amenity is empty)
/// and `name`. Rules are case-insensitive substring matches checked in
/// order, so "Hospital y Clínica" is a hospital.
pub fn place_type_for(tags: &BTreeMap<String, String>) -> PlaceType {
    let amenity = tags
        .get("amenity")
        .filter(|a| !a.is_empty())
        .or_else(|| tags.get("healthcare"))
        .map(String::as_str)
        .unwrap_or_default();
    let name = tags.get("name").map(String::as_str).unwrap_or_default();
    let mentions = |amenity_terms: &[&str], name_terms: &[&str]| {
        amenity_terms.iter().any(|t| contains_ignore_case(amenity, t))
            || name_terms.iter().any(|t| contains_ignore_case(name, t))
    };

    if mentions(&["hospital"], &["hospital"]) {
        PlaceType::Hospital
    } else if mentions(&["clinic"], &["clínica", "clinic"]) {
        PlaceType::Clinic
    } else if mentions(&["veterinary"], &["veterin"]) {
        PlaceType::Veterinary
    } else if mentions(&["doctor"], &["doctor", "médic"]) {
        PlaceType::Doctors
    } else {
        PlaceType::Default
    }
}
