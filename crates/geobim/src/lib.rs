pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod extract;
pub mod parser;
pub mod pipeline;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use convert::{ConversionSkipped, ModelConverter};
pub use error::{ConfigError, ExtractionError, GeobimError, Result, StorageError, WorkerError};
pub use extract::{BuildingMetadata, Coordinate};
pub use parser::{GeoAngle, ModelParser, ParsedModel};
pub use pipeline::{Pipeline, ProcessingOutcome, RetryPolicy};
pub use storage::{FileRetriever, ObjectStore};
pub use worker::{ProcessingJob, WorkerPool};
