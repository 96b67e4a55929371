//! DB-backed job source.
//!
//! The `ifc_files` table doubles as the durable queue: uploaded files sit in
//! `not_started` until a worker claims them. Claiming flips the row to
//! `processing` under `FOR UPDATE SKIP LOCKED`, so concurrent worker
//! processes never claim the same row twice.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};
use tracing::debug;

use crate::db::DatabaseError;
use crate::worker::job::ProcessingJob;

pub struct JobPoller {
    db: DatabaseConnection,
    batch_size: u64,
}

impl JobPoller {
    pub fn new(db: DatabaseConnection, batch_size: u64) -> Self {
        Self { db, batch_size }
    }

    /// Claims up to `batch_size` uploaded files that have not started
    /// processing yet and returns them as jobs.
    pub async fn claim_batch(&self) -> Result<Vec<ProcessingJob>, DatabaseError> {
        let rows = self
            .db
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                UPDATE ifc_files
                SET processing_status = 'processing', updated_at = NOW()
                WHERE id IN (
                    SELECT id FROM ifc_files
                    WHERE processing_status = 'not_started'
                      AND upload_status = 'completed'
                    ORDER BY created_at
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id::text AS id, s3_key
                "#,
                [(self.batch_size as i64).into()],
            ))
            .await?;

        let jobs = rows
            .iter()
            .map(|row| {
                Ok(ProcessingJob {
                    file_id: row.try_get("", "id")?,
                    storage_key: row.try_get("", "s3_key")?,
                })
            })
            .collect::<Result<Vec<_>, sea_orm::DbErr>>()?;

        if !jobs.is_empty() {
            debug!(claimed = jobs.len(), "claimed jobs from queue");
        }
        Ok(jobs)
    }
}
