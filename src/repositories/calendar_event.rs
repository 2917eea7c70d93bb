//! Calendar event repository (Google Calendar mirror)

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use crate::models::CalendarEvent;
use crate::models::calendar_event;

#[derive(Debug, Clone)]
pub struct CalendarEventRepository {
    db: Arc<DatabaseConnection>,
}

impl CalendarEventRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upserts on (user_id, google_event_id) and returns the stored rows.
    pub async fn upsert_many(
        &self,
        user_id: Uuid,
        rows: Vec<calendar_event::ActiveModel>,
    ) -> Result<Vec<calendar_event::Model>, DbErr> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let event_ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.google_event_id.try_as_ref().cloned())
            .collect();

        CalendarEvent::insert_many(rows)
            .on_conflict(
                OnConflict::columns([
                    calendar_event::Column::UserId,
                    calendar_event::Column::GoogleEventId,
                ])
                .update_columns([
                    calendar_event::Column::CalendarId,
                    calendar_event::Column::CalendarName,
                    calendar_event::Column::Summary,
                    calendar_event::Column::Description,
                    calendar_event::Column::Location,
                    calendar_event::Column::StartTime,
                    calendar_event::Column::EndTime,
                    calendar_event::Column::IsAllDay,
                    calendar_event::Column::EventType,
                    calendar_event::Column::Attendees,
                    calendar_event::Column::Organizer,
                    calendar_event::Column::Status,
                    calendar_event::Column::Visibility,
                    calendar_event::Column::ConferenceData,
                    calendar_event::Column::RecurringEventId,
                    calendar_event::Column::IcalUid,
                    calendar_event::Column::Sequence,
                    calendar_event::Column::EmbeddingText,
                    calendar_event::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        CalendarEvent::find()
            .filter(calendar_event::Column::UserId.eq(user_id))
            .filter(calendar_event::Column::GoogleEventId.is_in(event_ids))
            .all(&*self.db)
            .await
    }

    /// Flags events cancelled upstream; rows that were never synced are left alone.
    pub async fn mark_cancelled(&self, user_id: Uuid, event_ids: &[String]) -> Result<u64, DbErr> {
        if event_ids.is_empty() {
            return Ok(0);
        }
        let result = CalendarEvent::update_many()
            .col_expr(calendar_event::Column::Status, Expr::value("cancelled"))
            .col_expr(
                calendar_event::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(calendar_event::Column::UserId.eq(user_id))
            .filter(calendar_event::Column::GoogleEventId.is_in(event_ids.iter().cloned()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<bool, DbErr> {
        let result = CalendarEvent::update_many()
            .col_expr(calendar_event::Column::Embedding, Expr::value(json!(embedding)))
            .col_expr(
                calendar_event::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(calendar_event::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
