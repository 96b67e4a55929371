//! Database module for durable processing state.
//!
//! PostgreSQL with the PostGIS extension, accessed through SeaORM with
//! parameterized raw statements. Two tables: `ifc_files` (upload and
//! processing status per file) and `buildings` (one row per successfully
//! processed file, carrying the geospatial point).

use std::time::Duration;

pub mod error;
pub mod migrations;
pub mod persister;

pub use error::DatabaseError;
pub use persister::{PgPersister, ResultPersister};

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

/// Connects to PostgreSQL with bounded connect/acquire timeouts. Timeout
/// expiry surfaces as a `DatabaseError`, which the pipeline treats as
/// transient.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DatabaseError> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(10)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10));

    let db = Database::connect(options).await?;
    log::info!("Database connection pool established");
    Ok(db)
}

/// Applies all pending migrations.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DatabaseError> {
    use sea_orm_migration::MigratorTrait;

    migrations::Migrator::up(db, None).await?;
    log::info!("Database migrations applied");
    Ok(())
}
