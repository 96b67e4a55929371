//! Worker pool: N workers pulling jobs from a shared queue.
//!
//! Each worker processes at most one job at a time and reports the terminal
//! outcome on the results channel. Dropping the pool's sender side (via
//! [`WorkerPool::shutdown`]) lets workers drain the queue and exit.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::Pipeline;
use crate::worker::job::{JobCompletion, ProcessingJob};

pub struct WorkerPool {
    job_sender: mpsc::Sender<ProcessingJob>,
    result_receiver: mpsc::Receiver<JobCompletion>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `worker_count` workers over the shared pipeline.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");

        let (job_sender, job_receiver) = mpsc::channel::<ProcessingJob>(worker_count * 2);
        let (result_sender, result_receiver) = mpsc::channel::<JobCompletion>(worker_count * 2);
        let job_receiver = Arc::new(Mutex::new(job_receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let receiver = Arc::clone(&job_receiver);
            let sender = result_sender.clone();
            let pipeline = Arc::clone(&pipeline);
            workers.push(tokio::spawn(run_worker(
                worker_id, receiver, sender, pipeline,
            )));
        }

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
        }
    }

    pub async fn submit(&self, job: ProcessingJob) -> Result<(), WorkerError> {
        self.job_sender
            .send(job)
            .await
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// A detached handle for feeding the pool. All submitters (and the pool
    /// itself) must be dropped before [`WorkerPool::shutdown`] lets the
    /// workers drain out.
    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter {
            sender: self.job_sender.clone(),
        }
    }

    /// Next finished job, or `None` once all workers have stopped.
    pub async fn recv_result(&mut self) -> Option<JobCompletion> {
        self.result_receiver.recv().await
    }

    /// Stops accepting jobs, lets workers drain the queue, and waits for
    /// them to exit.
    pub async fn shutdown(self) {
        info!("Shutting down worker pool...");
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

/// Clonable sending side of the pool's job queue.
#[derive(Clone)]
pub struct JobSubmitter {
    sender: mpsc::Sender<ProcessingJob>,
}

impl JobSubmitter {
    pub async fn submit(&self, job: ProcessingJob) -> Result<(), WorkerError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| WorkerError::ChannelClosed)
    }
}

async fn run_worker(
    worker_id: usize,
    job_receiver: Arc<Mutex<mpsc::Receiver<ProcessingJob>>>,
    result_sender: mpsc::Sender<JobCompletion>,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        // Hold the lock only while pulling the next job, never while
        // processing one.
        let job = { job_receiver.lock().await.recv().await };
        let Some(job) = job else {
            debug!("Worker {} job channel closed", worker_id);
            break;
        };

        debug!(worker = worker_id, file_id = %job.file_id, "processing job");
        let outcome = pipeline.process(&job).await;

        if result_sender
            .send(JobCompletion::new(job, outcome))
            .await
            .is_err()
        {
            error!("Worker {} failed to send result", worker_id);
            break;
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::convert::ModelConverter;
    use crate::db::{DatabaseError, ResultPersister};
    use crate::extract::{BuildingMetadata, Coordinate};
    use crate::parser::StepParser;
    use crate::pipeline::RetryPolicy;
    use crate::storage::{FileRetriever, MemoryObjectStore};

    const SAMPLE: &[u8] = b"\
ISO-10303-21;
DATA;
#2=IFCSITE('x',$,'Site',$,$,$,$,$,$,41.89,12.49,$,$,$);
#3=IFCBUILDING('y',$,$,$,$,$,$,'Pool Test Tower',$,$,$,$);
ENDSEC;
END-ISO-10303-21;
";

    #[derive(Default)]
    struct CountingPersister {
        successes: AtomicU32,
    }

    #[async_trait]
    impl ResultPersister for CountingPersister {
        async fn mark_processing(&self, _file_id: &str) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn persist_success(
            &self,
            _file_id: &str,
            _coordinate: &Coordinate,
            _metadata: &BuildingMetadata,
            _artifact: Option<&str>,
        ) -> Result<i64, DatabaseError> {
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        async fn persist_failure(&self, _file_id: &str, _reason: &str) -> Result<(), DatabaseError> {
            Ok(())
        }
    }

    fn test_pipeline(store: MemoryObjectStore, persister: Arc<CountingPersister>) -> Pipeline {
        let store = Arc::new(store);
        let retriever = FileRetriever::new(store.clone(), "ifc-raw");
        let converter = ModelConverter::new(
            store,
            Path::new("/nonexistent/IfcConvert"),
            "ifc-models",
            "models",
        );
        Pipeline::new(
            retriever,
            Arc::new(StepParser::new()),
            converter,
            persister,
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn pool_processes_submitted_jobs() {
        let store = MemoryObjectStore::new();
        store.insert("ifc-raw", "a.ifc", Bytes::from_static(SAMPLE));
        store.insert("ifc-raw", "b.ifc", Bytes::from_static(SAMPLE));

        let persister = Arc::new(CountingPersister::default());
        let pipeline = Arc::new(test_pipeline(store, persister.clone()));

        let mut pool = WorkerPool::new(pipeline, 2);
        pool.submit(ProcessingJob::new("file-a", "a.ifc")).await.unwrap();
        pool.submit(ProcessingJob::new("file-b", "b.ifc")).await.unwrap();

        let first = pool.recv_result().await.unwrap();
        let second = pool.recv_result().await.unwrap();
        assert!(first.outcome.is_completed(), "{:?}", first.outcome);
        assert!(second.outcome.is_completed(), "{:?}", second.outcome);
        assert_eq!(persister.successes.load(Ordering::SeqCst), 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn pool_reports_failures_as_outcomes() {
        // Nothing seeded in the store: retrieval fails terminally.
        let persister = Arc::new(CountingPersister::default());
        let pipeline = Arc::new(test_pipeline(MemoryObjectStore::new(), persister));

        let mut pool = WorkerPool::new(pipeline, 1);
        pool.submit(ProcessingJob::new("file-a", "missing.ifc"))
            .await
            .unwrap();

        let completion = pool.recv_result().await.unwrap();
        assert!(!completion.outcome.is_completed());

        pool.shutdown().await;
    }
}
