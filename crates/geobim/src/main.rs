use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use geobim::convert::ModelConverter;
use geobim::db::{self, PgPersister};
use geobim::parser::StepParser;
use geobim::pipeline::{Pipeline, ProcessingOutcome};
use geobim::storage::{FileRetriever, S3ObjectStore};
use geobim::worker::{JobPoller, WorkerPool};
use geobim::{Config, Result};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.worker_count,
        "Starting geobim worker"
    );

    let db = db::connect(&config.database_url).await?;
    db::run_migrations(&db).await?;

    let store = Arc::new(S3ObjectStore::new(config.s3_config()).await);
    let retriever = FileRetriever::new(store.clone(), config.raw_bucket.clone());
    let converter = ModelConverter::new(
        store,
        config.convert_tool.clone(),
        config.artifact_bucket.clone(),
        config.artifact_prefix.clone(),
    )
    .with_timeout(config.convert_timeout);
    let persister = Arc::new(PgPersister::new(db.clone()));

    let pipeline = Arc::new(Pipeline::new(
        retriever,
        Arc::new(StepParser::new()),
        converter,
        persister,
        config.retry_policy(),
    ));

    let mut pool = WorkerPool::new(pipeline, config.worker_count);
    let submitter = pool.submitter();
    let poller = JobPoller::new(db, config.poll_batch_size);
    let mut ticker = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                match poller.claim_batch().await {
                    Ok(jobs) => {
                        for job in jobs {
                            if submitter.submit(job).await.is_err() {
                                warn!("Worker pool rejected job; shutting down");
                                break;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Queue poll failed"),
                }
            }
            Some(completion) = pool.recv_result() => {
                match &completion.outcome {
                    ProcessingOutcome::Completed { building_id, .. } => {
                        info!(
                            file_id = %completion.job.file_id,
                            building_id = *building_id,
                            "Job completed"
                        );
                    }
                    ProcessingOutcome::Failed { reason, retryable } => {
                        warn!(
                            file_id = %completion.job.file_id,
                            reason = %reason,
                            retryable = *retryable,
                            "Job failed"
                        );
                    }
                }
            }
        }
    }

    drop(submitter);
    pool.shutdown().await;
    Ok(())
}
