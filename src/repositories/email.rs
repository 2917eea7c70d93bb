//! Email repository (Gmail mirror)

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use crate::models::Email;
use crate::models::email;

/// Data columns overwritten on conflict; `embedding` is kept until the queue replaces it
const UPSERT_COLUMNS: [email::Column; 16] = [
    email::Column::ThreadId,
    email::Column::Subject,
    email::Column::SenderEmail,
    email::Column::SenderName,
    email::Column::Recipients,
    email::Column::Cc,
    email::Column::Content,
    email::Column::HtmlContent,
    email::Column::Snippet,
    email::Column::Labels,
    email::Column::IsRead,
    email::Column::IsStarred,
    email::Column::IsImportant,
    email::Column::IsTrash,
    email::Column::ReceivedAt,
    email::Column::EmbeddingText,
];

#[derive(Debug, Clone)]
pub struct EmailRepository {
    db: Arc<DatabaseConnection>,
}

impl EmailRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upserts on (user_id, google_message_id) and returns the stored rows.
    pub async fn upsert_many(
        &self,
        user_id: Uuid,
        rows: Vec<email::ActiveModel>,
    ) -> Result<Vec<email::Model>, DbErr> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let message_ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.google_message_id.try_as_ref().cloned())
            .collect();

        let mut update_columns = UPSERT_COLUMNS.to_vec();
        update_columns.push(email::Column::UpdatedAt);

        Email::insert_many(rows)
            .on_conflict(
                OnConflict::columns([email::Column::UserId, email::Column::GoogleMessageId])
                    .update_columns(update_columns)
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        Email::find()
            .filter(email::Column::UserId.eq(user_id))
            .filter(email::Column::GoogleMessageId.is_in(message_ids))
            .all(&*self.db)
            .await
    }

    /// Marks messages deleted upstream as trashed with the `DELETED` label.
    pub async fn mark_deleted(&self, user_id: Uuid, message_ids: &[String]) -> Result<u64, DbErr> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let result = Email::update_many()
            .col_expr(email::Column::IsTrash, Expr::value(true))
            .col_expr(email::Column::Labels, Expr::value(json!(["DELETED"])))
            .col_expr(
                email::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(email::Column::UserId.eq(user_id))
            .filter(email::Column::GoogleMessageId.is_in(message_ids.iter().cloned()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<bool, DbErr> {
        let result = Email::update_many()
            .col_expr(email::Column::Embedding, Expr::value(json!(embedding)))
            .col_expr(
                email::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(email::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
