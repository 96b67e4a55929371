use thiserror::Error;

use crate::extract::geo::Axis;

#[derive(Error, Debug)]
pub enum GeobimError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    MissingVariable(&'static str),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures while fetching an object from the storage collaborator.
///
/// The storage client's own error taxonomy is collapsed into exactly these
/// three kinds; anything unrecognized is treated as transient.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found in storage: {0}")]
    NotFound(String),

    #[error("Access denied to storage object: {0}")]
    AccessDenied(String),

    #[error("Transient storage error: {0}")]
    Transient(String),
}

impl StorageError {
    /// Whether a retry with unchanged inputs can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Failures while reading coordinates and attributes out of a model file.
/// None of these are retryable: the source data will not change on retry.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Model contains no site with geographic reference coordinates")]
    NoGeoReference,

    #[error("Invalid {axis} angle: {detail}")]
    InvalidFormat { axis: Axis, detail: String },

    #[error("Invalid {axis}: {value} (must be between {} and {})", .axis.lower_bound(), .axis.upper_bound())]
    CoordinateOutOfRange { axis: Axis, value: f64 },

    #[error("Failed to read model file: {0}")]
    UnreadableFile(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, GeobimError>;
