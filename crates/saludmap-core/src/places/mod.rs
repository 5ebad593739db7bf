//! Places near the current location.
//!
//! This module provides:
//! - `PlacesSyncEngine`: follows the tracker and keeps a `PlacesState`
//!   current, cache first, then the places API through the resource proxy
//! - `normalize_api_response`: turns any supported payload shape into `Place`s
//! - `place_type_for`: category rules over free-text tags

pub mod classify;
pub mod engine;
pub mod normalize;

pub use classify::place_type_for;
pub use engine::{PlacesSettings, PlacesState, PlacesSyncEngine, DEFAULT_SEARCH_RADIUS_M};
pub use normalize::{normalize_api_response, normalize_bytes, try_normalize, NormalizationError};
