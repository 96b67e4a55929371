//! Terminal-outcome persistence: one transaction per outcome.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement, TransactionTrait};
use tracing::{debug, info};

use crate::db::DatabaseError;
use crate::extract::{BuildingMetadata, Coordinate};

/// The pipeline's seam onto durable state. Implemented for PostgreSQL below;
/// tests substitute their own.
#[async_trait]
pub trait ResultPersister: Send + Sync {
    /// Records that an attempt is underway, so concurrent observers see
    /// progress before a terminal outcome lands.
    async fn mark_processing(&self, file_id: &str) -> Result<(), DatabaseError>;

    /// Applies a successful outcome: file record → `completed` plus exactly
    /// one building record. Returns the building id.
    async fn persist_success(
        &self,
        file_id: &str,
        coordinate: &Coordinate,
        metadata: &BuildingMetadata,
        artifact: Option<&str>,
    ) -> Result<i64, DatabaseError>;

    /// Applies a failed outcome: file record → `failed` with the
    /// human-readable reason.
    async fn persist_failure(&self, file_id: &str, reason: &str) -> Result<(), DatabaseError>;
}

/// PostgreSQL/PostGIS persister.
#[derive(Clone)]
pub struct PgPersister {
    db: DatabaseConnection,
}

impl PgPersister {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResultPersister for PgPersister {
    async fn mark_processing(&self, file_id: &str) -> Result<(), DatabaseError> {
        // A completed record never regresses; processing_status only moves
        // forward within an attempt.
        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                UPDATE ifc_files
                SET processing_status = 'processing', updated_at = NOW()
                WHERE id = $1::uuid AND processing_status <> 'completed'
                "#,
                [file_id.into()],
            ))
            .await?;
        debug!(file_id, "file record marked processing");
        Ok(())
    }

    async fn persist_success(
        &self,
        file_id: &str,
        coordinate: &Coordinate,
        metadata: &BuildingMetadata,
        artifact: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let txn = self.db.begin().await?;

        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE ifc_files
            SET processing_status = 'completed', error_message = NULL, updated_at = NOW()
            WHERE id = $1::uuid
            "#,
            [file_id.into()],
        ))
        .await?;

        // PostGIS points are (longitude, latitude). The upsert keeps
        // re-delivered successes from creating duplicate building rows.
        let row = txn
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO buildings (
                    ifc_file_id, name, address, city, country,
                    height, floor_count, model_url, location,
                    created_at, updated_at
                ) VALUES (
                    $1::uuid, $2, $3, $4, $5,
                    $6, $7, $8, ST_SetSRID(ST_MakePoint($9, $10), 4326)::geography,
                    NOW(), NOW()
                )
                ON CONFLICT (ifc_file_id) DO UPDATE
                SET name = EXCLUDED.name,
                    address = EXCLUDED.address,
                    city = EXCLUDED.city,
                    country = EXCLUDED.country,
                    height = EXCLUDED.height,
                    floor_count = EXCLUDED.floor_count,
                    model_url = EXCLUDED.model_url,
                    location = EXCLUDED.location,
                    updated_at = NOW()
                RETURNING id
                "#,
                [
                    file_id.into(),
                    metadata.name.clone().into(),
                    metadata.address.clone().into(),
                    metadata.city.clone().into(),
                    metadata.country.clone().into(),
                    metadata.height.into(),
                    metadata.floor_count.map(|n| n as i32).into(),
                    artifact.map(|s| s.to_string()).into(),
                    coordinate.longitude().into(),
                    coordinate.latitude().into(),
                ],
            ))
            .await?
            .ok_or(DatabaseError::MissingReturning)?;

        let building_id: i64 = row.try_get("", "id")?;
        txn.commit().await?;

        info!(file_id, building_id, "persisted processing result");
        Ok(building_id)
    }

    async fn persist_failure(&self, file_id: &str, reason: &str) -> Result<(), DatabaseError> {
        let txn = self.db.begin().await?;

        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE ifc_files
            SET processing_status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1::uuid
            "#,
            [file_id.into(), reason.into()],
        ))
        .await?;

        txn.commit().await?;
        info!(file_id, reason, "persisted processing failure");
        Ok(())
    }
}
