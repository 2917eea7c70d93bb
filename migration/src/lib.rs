//! Database migrations for the CRM sync service.

pub use sea_orm_migration::prelude::*;

mod m2025_01_01_000001_create_users;
mod m2025_01_01_000002_create_crm_tables;
mod m2025_01_01_000003_create_emails_and_events;
mod m2025_01_01_000004_create_conversations;
mod m2025_01_01_000005_create_embedding_queue;
mod m2025_01_01_000006_create_handbooks_and_sync_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_01_000001_create_users::Migration),
            Box::new(m2025_01_01_000002_create_crm_tables::Migration),
            Box::new(m2025_01_01_000003_create_emails_and_events::Migration),
            Box::new(m2025_01_01_000004_create_conversations::Migration),
            Box::new(m2025_01_01_000005_create_embedding_queue::Migration),
            Box::new(m2025_01_01_000006_create_handbooks_and_sync_runs::Migration),
        ]
    }
}
