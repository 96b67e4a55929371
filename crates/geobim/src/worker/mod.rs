//! Job consumption: the queue-facing side of the pipeline.

pub mod job;
pub mod pool;
pub mod source;

pub use job::{JobCompletion, ProcessingJob};
pub use pool::{JobSubmitter, WorkerPool};
pub use source::JobPoller;
