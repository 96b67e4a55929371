//! Schema migrations, applied in order at worker startup.

use sea_orm_migration::prelude::*;

mod m20260806_000001_create_ifc_files;
mod m20260806_000002_create_buildings;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260806_000001_create_ifc_files::Migration),
            Box::new(m20260806_000002_create_buildings::Migration),
        ]
    }
}
