use thiserror::Error;

use crate::store::StorageError;

/// Failure of a positioning request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out waiting for a location fix")]
    Timeout,

    #[error("Unknown location error: {0}")]
    Unknown(String),
}

impl PositionError {
    /// Map a W3C geolocation error code (1 = permission denied,
    /// 2 = position unavailable, 3 = timeout).
    pub fn from_code(code: u16, message: &str) -> Self {
        match code {
            1 => PositionError::PermissionDenied,
            2 => PositionError::Unavailable(message.to_string()),
            3 => PositionError::Timeout,
            _ => PositionError::Unknown(message.to_string()),
        }
    }

    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            PositionError::PermissionDenied => "permission_denied",
            PositionError::Unavailable(_) => "unavailable",
            PositionError::Timeout => "timeout",
            PositionError::Unknown(_) => "unknown",
        }
    }
}

/// Failure of a tracker operation that both positions and persists.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Position(#[from] PositionError),

    #[error("Failed to save location: {0}")]
    Storage(#[from] StorageError),
}
