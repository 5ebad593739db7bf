//! Location tracking.
//!
//! This module provides:
//! - `LocationTracker`: owner of the single authoritative current fix
//! - `PositionProvider`: the positioning backend the tracker drives
//! - `IpPositionProvider`: coarse positioning from an IP geolocation service
//!
//! Manual fixes are sticky: the watch loop never replaces them. Only an
//! explicit `get_current_position`, `calibrate_position`, or another manual
//! fix changes the current location after `set_manual_location`.

pub mod error;
pub mod ip;
pub mod provider;
pub mod tracker;

pub use error::{PositionError, TrackerError};
pub use ip::IpPositionProvider;
pub use provider::{PositionOptions, PositionProvider, PositionStream, RawPosition};
pub use tracker::{LocationTracker, TrackerStatus};
