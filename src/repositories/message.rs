//! Conversation and message repository (WhatsApp and Slack imports)

use std::sync::Arc;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::models::{Conversation, Message};
use crate::models::{conversation, message};

#[derive(Debug, Clone)]
pub struct MessageRepository {
    db: Arc<DatabaseConnection>,
}

impl MessageRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Conversation owned by `user_id`
    pub async fn find_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<conversation::Model>, DbErr> {
        Conversation::find_by_id(conversation_id)
            .filter(conversation::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await
    }

    /// Returns the conversation keyed on (user, platform, chat id), creating it when missing.
    pub async fn get_or_create_conversation(
        &self,
        user_id: Uuid,
        platform_type: &str,
        external_chat_id: &str,
        title: Option<&str>,
    ) -> Result<conversation::Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let row = conversation::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            platform_type: Set(platform_type.to_string()),
            external_chat_id: Set(external_chat_id.to_string()),
            title: Set(title.map(str::to_string)),
            last_message_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Conversation::insert(row)
            .on_conflict(
                OnConflict::columns([
                    conversation::Column::UserId,
                    conversation::Column::PlatformType,
                    conversation::Column::ExternalChatId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        Conversation::find()
            .filter(conversation::Column::UserId.eq(user_id))
            .filter(conversation::Column::PlatformType.eq(platform_type))
            .filter(conversation::Column::ExternalChatId.eq(external_chat_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("conversation {}", external_chat_id)))
    }

    /// Upserts on (user_id, platform_type, platform_message_id); returns rows written.
    pub async fn upsert_messages(&self, rows: Vec<message::ActiveModel>) -> Result<u64, DbErr> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len() as u64;
        Message::insert_many(rows)
            .on_conflict(
                OnConflict::columns([
                    message::Column::UserId,
                    message::Column::PlatformType,
                    message::Column::PlatformMessageId,
                ])
                .update_columns([
                    message::Column::ConversationId,
                    message::Column::Content,
                    message::Column::SenderId,
                    message::Column::IsFromMe,
                    message::Column::Metadata,
                    message::Column::PlatformTimestamp,
                    message::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(count)
    }

    /// Moves `last_message_at` forward; an older timestamp never rewinds it.
    pub async fn touch_conversation(
        &self,
        conversation_id: Uuid,
        last_message_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        Conversation::update_many()
            .col_expr(
                conversation::Column::LastMessageAt,
                Expr::value(last_message_at),
            )
            .col_expr(
                conversation::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(conversation::Column::Id.eq(conversation_id))
            .filter(
                conversation::Column::LastMessageAt
                    .is_null()
                    .or(conversation::Column::LastMessageAt.lt(last_message_at)),
            )
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn count_in_conversation(&self, conversation_id: Uuid) -> Result<u64, DbErr> {
        Message::find()
            .filter(message::Column::ConversationId.eq(conversation_id))
            .count(&*self.db)
            .await
    }
}
