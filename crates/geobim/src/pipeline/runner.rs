//! The job orchestrator: sequences retrieval, extraction, conversion, and
//! persistence, and owns the retry policy.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::StorageError;
use crate::extract::{self, metadata};
use crate::parser::ModelParser;
use crate::pipeline::ProcessingOutcome;
use crate::convert::ModelConverter;
use crate::db::ResultPersister;
use crate::storage::FileRetriever;
use crate::worker::job::ProcessingJob;

/// Bounded retry with fixed backoff. Attempts are counted from 1, so
/// `max_attempts: 3` means at most two retries after the first failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

/// How a single attempt went wrong. Transient failures are eligible for
/// retry; fatal ones terminate the job immediately.
#[derive(Debug)]
enum AttemptError {
    Fatal(String),
    Transient(String),
}

pub struct Pipeline {
    retriever: FileRetriever,
    parser: Arc<dyn ModelParser>,
    converter: ModelConverter,
    persister: Arc<dyn ResultPersister>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        retriever: FileRetriever,
        parser: Arc<dyn ModelParser>,
        converter: ModelConverter,
        persister: Arc<dyn ResultPersister>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            retriever,
            parser,
            converter,
            persister,
            retry,
        }
    }

    /// Runs a job to a terminal outcome, retrying transient failures within
    /// the attempt budget. The terminal outcome is always recorded in the
    /// file-status record before this returns.
    pub async fn process(&self, job: &ProcessingJob) -> ProcessingOutcome {
        let span = info_span!("pipeline", file_id = %job.file_id, storage_key = %job.storage_key);
        async {
            let mut attempt: u32 = 1;
            loop {
                let result = self
                    .run_attempt(job)
                    .instrument(info_span!("attempt", attempt))
                    .await;
                match result {
                    Ok(outcome) => return outcome,
                    Err(AttemptError::Fatal(reason)) => {
                        error!(%reason, attempt, "job failed terminally");
                        self.record_failure(&job.file_id, &reason).await;
                        return ProcessingOutcome::Failed {
                            reason,
                            retryable: false,
                        };
                    }
                    Err(AttemptError::Transient(reason)) => {
                        if attempt >= self.retry.max_attempts {
                            error!(%reason, attempt, "retry budget exhausted");
                            self.record_failure(&job.file_id, &reason).await;
                            return ProcessingOutcome::Failed {
                                reason,
                                retryable: true,
                            };
                        }
                        warn!(
                            %reason,
                            attempt,
                            backoff_secs = self.retry.backoff.as_secs(),
                            "transient failure, scheduling retry"
                        );
                        tokio::time::sleep(self.retry.backoff).await;
                        attempt += 1;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_attempt(&self, job: &ProcessingJob) -> Result<ProcessingOutcome, AttemptError> {
        self.persister
            .mark_processing(&job.file_id)
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        // Retrieving. The scratch file lives to the end of the attempt and
        // is deleted on drop, whatever path we leave by.
        debug!("retrieving source file");
        let scratch = self
            .retriever
            .retrieve(&job.storage_key)
            .await
            .map_err(|e| match e {
                StorageError::Transient(_) => AttemptError::Transient(e.to_string()),
                StorageError::NotFound(_) | StorageError::AccessDenied(_) => {
                    AttemptError::Fatal(e.to_string())
                }
            })?;

        // Extracting. Malformed or incomplete source data will not change
        // on retry, so every failure here is terminal.
        debug!("extracting coordinates and metadata");
        let model = self
            .parser
            .open(scratch.path())
            .map_err(|e| AttemptError::Fatal(e.to_string()))?;
        let coordinate =
            extract::extract_location(&model).map_err(|e| AttemptError::Fatal(e.to_string()))?;
        let building = metadata::resolve(&model, &job.storage_key);
        info!(
            latitude = coordinate.latitude(),
            longitude = coordinate.longitude(),
            name = %building.name,
            "extraction complete"
        );

        // Converting is best-effort: a skip is logged and the job proceeds
        // without an artifact reference.
        let artifact = match self.converter.convert(scratch.path(), &job.file_id).await {
            Ok(url) => Some(url),
            Err(skip) => {
                warn!(reason = %skip, "3D conversion skipped");
                None
            }
        };

        // Persisting. The store may be transiently unavailable.
        let building_id = self
            .persister
            .persist_success(&job.file_id, &coordinate, &building, artifact.as_deref())
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        info!(building_id, "job completed");
        Ok(ProcessingOutcome::Completed {
            building_id,
            coordinate,
            metadata: building,
            artifact,
        })
    }

    /// Terminal failures are reported through the durable file record; if
    /// even that write fails there is nothing left to do but log it.
    async fn record_failure(&self, file_id: &str, reason: &str) {
        if let Err(e) = self.persister.persist_failure(file_id, reason).await {
            error!(error = %e, file_id, "could not record terminal failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::db::DatabaseError;
    use crate::error::ExtractionError;
    use crate::extract::{BuildingMetadata, Coordinate};
    use crate::parser::{AttrValue, Entity, ParsedModel};
    use crate::storage::{MemoryObjectStore, ObjectStore};

    // ── Test doubles ──

    struct FakeParser {
        model: ParsedModel,
    }

    impl ModelParser for FakeParser {
        fn open(&self, _path: &std::path::Path) -> Result<ParsedModel, ExtractionError> {
            Ok(self.model.clone())
        }
    }

    struct FailingParser;

    impl ModelParser for FailingParser {
        fn open(&self, _path: &std::path::Path) -> Result<ParsedModel, ExtractionError> {
            Err(ExtractionError::UnreadableFile("corrupt header".into()))
        }
    }

    struct DenyingStore;

    #[async_trait]
    impl ObjectStore for DenyingStore {
        async fn get(&self, _bucket: &str, key: &str) -> Result<Bytes, crate::StorageError> {
            Err(crate::StorageError::AccessDenied(key.to_string()))
        }

        async fn put(
            &self,
            _bucket: &str,
            _key: &str,
            _bytes: Bytes,
            _content_type: &str,
        ) -> Result<(), crate::StorageError> {
            Ok(())
        }
    }

    struct FlakyStore;

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn get(&self, _bucket: &str, _key: &str) -> Result<Bytes, crate::StorageError> {
            Err(crate::StorageError::Transient("connection reset".into()))
        }

        async fn put(
            &self,
            _bucket: &str,
            _key: &str,
            _bytes: Bytes,
            _content_type: &str,
        ) -> Result<(), crate::StorageError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockPersister {
        mark_calls: AtomicU32,
        persist_attempts: AtomicU32,
        transient_failures_remaining: AtomicU32,
        completed: Mutex<Vec<(String, Option<String>)>>,
        failures: Mutex<Vec<(String, String)>>,
    }

    impl MockPersister {
        fn failing_first(n: u32) -> Self {
            let persister = Self::default();
            persister.transient_failures_remaining.store(n, Ordering::SeqCst);
            persister
        }
    }

    #[async_trait]
    impl ResultPersister for MockPersister {
        async fn mark_processing(&self, _file_id: &str) -> Result<(), DatabaseError> {
            self.mark_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn persist_success(
            &self,
            file_id: &str,
            _coordinate: &Coordinate,
            _metadata: &BuildingMetadata,
            artifact: Option<&str>,
        ) -> Result<i64, DatabaseError> {
            self.persist_attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient_failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures_remaining
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(DatabaseError::Db(sea_orm::DbErr::Custom(
                    "connection reset by peer".into(),
                )));
            }
            self.completed
                .lock()
                .unwrap()
                .push((file_id.to_string(), artifact.map(|s| s.to_string())));
            Ok(42)
        }

        async fn persist_failure(&self, file_id: &str, reason: &str) -> Result<(), DatabaseError> {
            self.failures
                .lock()
                .unwrap()
                .push((file_id.to_string(), reason.to_string()));
            Ok(())
        }
    }

    // ── Helpers ──

    fn located_model() -> ParsedModel {
        let mut model = ParsedModel::new();
        model.push(
            "IfcSite",
            Entity::new()
                .with(
                    "RefLatitude",
                    AttrValue::RealList(vec![41.0, 53.0, 24.0, 72000.0]),
                )
                .with(
                    "RefLongitude",
                    AttrValue::RealList(vec![12.0, 29.0, 32.0, 64000.0]),
                ),
        );
        model.push(
            "IfcBuilding",
            Entity::new().with("LongName", AttrValue::Text("Palazzo Esempio".into())),
        );
        model
    }

    fn seeded_store() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        store.insert(
            "ifc-raw",
            "uploads/tmp_model.ifc",
            Bytes::from_static(b"ISO-10303-21;"),
        );
        store
    }

    fn pipeline_with(
        store: Arc<dyn ObjectStore>,
        parser: Arc<dyn ModelParser>,
        persister: Arc<MockPersister>,
        tool: impl Into<PathBuf>,
    ) -> Pipeline {
        let retriever = FileRetriever::new(store.clone(), "ifc-raw");
        let converter = ModelConverter::new(store, tool, "ifc-models", "models")
            .with_timeout(Duration::from_secs(5));
        Pipeline::new(
            retriever,
            parser,
            converter,
            persister,
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::ZERO,
            },
        )
    }

    fn job() -> ProcessingJob {
        ProcessingJob::new(
            uuid::Uuid::new_v4().to_string(),
            "uploads/tmp_model.ifc".to_string(),
        )
    }

    // ── Terminal classification ──

    #[tokio::test]
    async fn access_denied_terminates_without_retry() {
        let persister = Arc::new(MockPersister::default());
        let pipeline = pipeline_with(
            Arc::new(DenyingStore),
            Arc::new(FakeParser {
                model: located_model(),
            }),
            persister.clone(),
            "/nonexistent/IfcConvert",
        );

        let outcome = pipeline.process(&job()).await;
        match outcome {
            ProcessingOutcome::Failed { reason, retryable } => {
                assert!(!retryable);
                assert!(reason.contains("Access denied"), "reason: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // No retry: attempt count stays at 1.
        assert_eq!(persister.mark_calls.load(Ordering::SeqCst), 1);
        assert_eq!(persister.failures.lock().unwrap().len(), 1);
        assert!(persister.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_object_terminates_without_retry() {
        let persister = Arc::new(MockPersister::default());
        let store = MemoryObjectStore::new();
        let pipeline = pipeline_with(
            Arc::new(store),
            Arc::new(FakeParser {
                model: located_model(),
            }),
            persister.clone(),
            "/nonexistent/IfcConvert",
        );

        let outcome = pipeline.process(&job()).await;
        match outcome {
            ProcessingOutcome::Failed { reason, retryable } => {
                assert!(!retryable);
                assert!(reason.contains("not found"), "reason: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(persister.mark_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn extraction_failure_is_terminal() {
        let persister = Arc::new(MockPersister::default());
        let pipeline = pipeline_with(
            Arc::new(seeded_store()),
            Arc::new(FailingParser),
            persister.clone(),
            "/nonexistent/IfcConvert",
        );

        let outcome = pipeline.process(&job()).await;
        match outcome {
            ProcessingOutcome::Failed { reason, retryable } => {
                assert!(!retryable);
                assert!(reason.contains("corrupt header"), "reason: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(persister.mark_calls.load(Ordering::SeqCst), 1);
        assert_eq!(persister.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn model_without_site_is_terminal() {
        let persister = Arc::new(MockPersister::default());
        let pipeline = pipeline_with(
            Arc::new(seeded_store()),
            Arc::new(FakeParser {
                model: ParsedModel::new(),
            }),
            persister.clone(),
            "/nonexistent/IfcConvert",
        );

        let outcome = pipeline.process(&job()).await;
        match outcome {
            ProcessingOutcome::Failed { reason, retryable } => {
                assert!(!retryable);
                assert!(reason.contains("no site"), "reason: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    // ── Retry behavior ──

    #[tokio::test]
    async fn transient_retrieval_exhausts_into_terminal_failure() {
        let persister = Arc::new(MockPersister::default());
        let pipeline = pipeline_with(
            Arc::new(FlakyStore),
            Arc::new(FakeParser {
                model: located_model(),
            }),
            persister.clone(),
            "/nonexistent/IfcConvert",
        );

        let outcome = pipeline.process(&job()).await;
        match outcome {
            ProcessingOutcome::Failed { reason, retryable } => {
                assert!(retryable);
                assert!(reason.contains("connection reset"), "reason: {reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // All three attempts ran before the budget was exhausted.
        assert_eq!(persister.mark_calls.load(Ordering::SeqCst), 3);
        assert_eq!(persister.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_persistence_succeeds_on_third_attempt() {
        let persister = Arc::new(MockPersister::failing_first(2));
        let pipeline = pipeline_with(
            Arc::new(seeded_store()),
            Arc::new(FakeParser {
                model: located_model(),
            }),
            persister.clone(),
            "/nonexistent/IfcConvert",
        );

        let outcome = pipeline.process(&job()).await;
        assert!(outcome.is_completed(), "outcome: {outcome:?}");
        assert_eq!(persister.mark_calls.load(Ordering::SeqCst), 3);
        assert_eq!(persister.persist_attempts.load(Ordering::SeqCst), 3);
        // Exactly one building record was applied.
        assert_eq!(persister.completed.lock().unwrap().len(), 1);
        assert!(persister.failures.lock().unwrap().is_empty());
    }

    // ── Conversion degradation ──

    #[tokio::test]
    async fn missing_conversion_tool_still_completes_without_artifact() {
        let persister = Arc::new(MockPersister::default());
        let pipeline = pipeline_with(
            Arc::new(seeded_store()),
            Arc::new(FakeParser {
                model: located_model(),
            }),
            persister.clone(),
            "/nonexistent/IfcConvert",
        );

        let outcome = pipeline.process(&job()).await;
        match outcome {
            ProcessingOutcome::Completed {
                building_id,
                coordinate,
                metadata,
                artifact,
            } => {
                assert_eq!(building_id, 42);
                assert!(artifact.is_none());
                assert!((coordinate.latitude() - 41.890020).abs() < 1e-4);
                assert_eq!(metadata.name, "Palazzo Esempio");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let completed = persister.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].1, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_conversion_attaches_artifact_reference() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let tool = tmp.path().join("convert-ok.sh");
        {
            // Close the handle before the tool is executed.
            let mut file = std::fs::File::create(&tool).unwrap();
            writeln!(file, "#!/bin/sh\ncp \"$1\" \"$2\"").unwrap();
            let mut perms = file.metadata().unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&tool, perms).unwrap();
        }

        let store = seeded_store();
        let persister = Arc::new(MockPersister::default());
        let pipeline = pipeline_with(
            Arc::new(store.clone()),
            Arc::new(FakeParser {
                model: located_model(),
            }),
            persister.clone(),
            &tool,
        );

        let job = job();
        let outcome = pipeline.process(&job).await;
        match outcome {
            ProcessingOutcome::Completed { artifact, .. } => {
                let expected = format!("/ifc-models/models/{}.glb", job.file_id);
                assert_eq!(artifact.as_deref(), Some(expected.as_str()));
                assert!(store.contains("ifc-models", &format!("models/{}.glb", job.file_id)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
