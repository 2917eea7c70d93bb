//! UserIntegration entity model
//!
//! Per-user, per-platform credentials. Tokens are stored as AES-GCM ciphertext; `metadata`
//! carries the incremental sync watermarks (`historyId`, `calendarSyncTokens`) and counters.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "user_integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    /// One of `gmail`, `google_calendar`, `hubspot`, `slack`, `periskope`
    pub platform: String,

    pub is_active: bool,

    pub access_token_ciphertext: Option<Vec<u8>>,

    pub refresh_token_ciphertext: Option<Vec<u8>>,

    pub token_expires_at: Option<DateTimeWithTimeZone>,

    pub last_sync_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
