//! Error types for the medimate_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medimate_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required field is missing or malformed
    #[error("Invalid {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    /// Time-of-day string is not `HH:MM`
    #[error("Invalid time format: {0:?} (expected HH:MM)")]
    InvalidFormat(String),

    /// Strict registration of a device id that already exists
    #[error("Device {0} is already registered")]
    Conflict(String),

    /// Unknown device id
    #[error("Device {0} not found")]
    NotFound(String),

    /// Event references a slot/medication that is not currently loaded
    #[error("Slot {slot} on device {device_id} has no active assignment{}", .medication.as_ref().map(|m| format!(" for {}", m)).unwrap_or_default())]
    Unassigned {
        device_id: String,
        slot: u32,
        medication: Option<String>,
    },

    /// Status value outside dispensed/confirmed/missed/skipped
    #[error("Invalid dose status: {0:?}")]
    InvalidStatus(String),
}

/// Coarse classification of an [`Error`], for callers that map failures
/// onto their own response codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Conflict,
    NotFound,
    Unassigned,
    InvalidStatus,
    Storage,
}

impl Error {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput { .. } | Error::InvalidFormat(_) => ErrorKind::InvalidInput,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unassigned { .. } => ErrorKind::Unassigned,
            Error::InvalidStatus(_) => ErrorKind::InvalidStatus,
            Error::Io(_) | Error::Json(_) | Error::Csv(_) | Error::Toml(_) | Error::Config(_) => {
                ErrorKind::Storage
            }
        }
    }
}
