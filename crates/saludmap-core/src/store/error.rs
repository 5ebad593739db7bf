use std::io;

use thiserror::Error;

/// Failures of the durable store. Callers treat every variant as "offline
/// capability unavailable", never as fatal.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded: {0}")]
    Quota(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record in {name}: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// ENOSPC on Unix, ERROR_DISK_FULL on Windows.
const OUT_OF_SPACE_CODES: [i32; 2] = [28, 112];

impl StorageError {
    pub(crate) fn from_io(context: &str, err: io::Error) -> Self {
        let message = format!("{}: {}", context, err);
        match err.raw_os_error() {
            Some(code) if OUT_OF_SPACE_CODES.contains(&code) => StorageError::Quota(message),
            _ => StorageError::Unavailable(message),
        }
    }

    pub(crate) fn corrupt(name: &str, reason: impl ToString) -> Self {
        StorageError::Corrupt {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
