use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::ProcessingOutcome;

/// One unit of work: process the file behind `storage_key` and record the
/// outcome under `file_id`. Consumed exactly once per delivery; a retry is
/// a fresh delivery, not a held-on-to copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    /// UUID of the file record in the database.
    pub file_id: String,
    /// Object key of the raw file in the input bucket.
    pub storage_key: String,
}

impl ProcessingJob {
    pub fn new(file_id: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            storage_key: storage_key.into(),
        }
    }
}

/// A finished job together with its terminal outcome.
#[derive(Debug)]
pub struct JobCompletion {
    pub job: ProcessingJob,
    pub outcome: ProcessingOutcome,
    pub finished_at: DateTime<Utc>,
}

impl JobCompletion {
    pub fn new(job: ProcessingJob, outcome: ProcessingOutcome) -> Self {
        Self {
            job,
            outcome,
            finished_at: Utc::now(),
        }
    }
}
