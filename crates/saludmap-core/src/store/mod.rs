//! Durable local store for offline operation.
//!
//! This module provides the `DurableStore`, which persists four record
//! families under one directory:
//! - location history (`locations.json`)
//! - named saved locations (`saved_locations.json`)
//! - cached nearby places (`places.json`)
//! - cached network resources (`resources/{tiles,api,static}/*.entry`)
//!
//! Every write lands in a temporary file that is renamed into place, so a
//! crash or a concurrent reader never observes a partial record.

pub mod error;
pub mod manager;

pub use error::StorageError;
pub use manager::{
    CacheStats, DurableStore, DEFAULT_API_MAX_AGE_DAYS, DEFAULT_NEARBY_RADIUS_M,
    DEFAULT_TILE_MAX_AGE_DAYS,
};
