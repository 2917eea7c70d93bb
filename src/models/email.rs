//! Email entity model
//!
//! Per-user mirror of Gmail messages, unique on (user_id, google_message_id).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "emails")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub google_message_id: String,

    pub thread_id: Option<String>,

    pub subject: Option<String>,

    pub sender_email: Option<String>,

    pub sender_name: Option<String>,

    /// JSON array of recipient addresses
    #[sea_orm(column_type = "JsonBinary")]
    pub recipients: JsonValue,

    #[sea_orm(column_type = "JsonBinary")]
    pub cc: JsonValue,

    /// Plain-text body
    pub content: Option<String>,

    pub html_content: Option<String>,

    pub snippet: Option<String>,

    /// JSON array of Gmail label ids
    #[sea_orm(column_type = "JsonBinary")]
    pub labels: JsonValue,

    pub is_read: bool,

    pub is_starred: bool,

    pub is_important: bool,

    pub is_trash: bool,

    pub received_at: Option<DateTimeWithTimeZone>,

    /// Text submitted for embedding
    pub embedding_text: Option<String>,

    /// Embedding vector as a JSON array of floats
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
