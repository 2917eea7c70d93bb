//! CalendarEvent entity model
//!
//! Per-user mirror of Google Calendar events across all of the user's calendars.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "calendar_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub google_event_id: String,

    pub calendar_id: String,

    pub calendar_name: Option<String>,

    pub summary: Option<String>,

    pub description: Option<String>,

    pub location: Option<String>,

    pub start_time: DateTimeWithTimeZone,

    pub end_time: Option<DateTimeWithTimeZone>,

    pub is_all_day: bool,

    pub event_type: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub attendees: JsonValue,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub organizer: Option<JsonValue>,

    /// `confirmed`, `tentative` or `cancelled`
    pub status: Option<String>,

    pub visibility: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub conference_data: Option<JsonValue>,

    pub recurring_event_id: Option<String>,

    pub ical_uid: Option<String>,

    pub sequence: Option<i32>,

    pub embedding_text: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub embedding: Option<JsonValue>,

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
