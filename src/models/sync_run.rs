//! SyncRun entity model
//!
//! One row per invocation of a sync routine: status `running` until it ends as `succeeded` or
//! `failed`, with counters and the last provider cursor reached.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// NULL for tenant-wide runs such as HubSpot
    pub user_id: Option<Uuid>,

    /// e.g. `gmail`, `google_calendar`, `hubspot_companies`, `periskope`, `slack`
    pub source: String,

    /// `full` or `incremental`
    pub mode: String,

    pub status: String,

    pub records_fetched: i64,

    pub records_saved: i64,

    pub records_skipped: i64,

    pub chunks: i32,

    pub last_cursor: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub errors: Option<JsonValue>,

    pub started_at: DateTimeWithTimeZone,

    pub finished_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
