//! Data models shared by every saludmap component.
//!
//! - `LocationFix`, `FixSource`, `Coordinates`: position samples and their provenance
//! - `SavedLocation`: user-named places
//! - `Place`, `CachedPlace`, `PlaceType`: canonical points of interest
//! - `CacheEntry`, `Partition`: cached network resources

use chrono::{DateTime, SubsecRound, Utc};

pub mod location;
pub mod place;
pub mod resource;
pub mod saved;

pub use location::{Coordinates, FixSource, LocationFix};
pub use place::{CachedPlace, Place, PlaceType, SEARCH_CATEGORIES};
pub use resource::{CacheEntry, Partition};
pub use saved::{SavedLocation, MAX_DESCRIPTION_LENGTH, MAX_NAME_LENGTH};

/// The current time at the millisecond precision records are persisted with,
/// so a record compares equal to itself after a store round trip.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
