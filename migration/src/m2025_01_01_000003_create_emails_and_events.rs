//! Migration to create the emails and calendar_events tables.
//!
//! Both are per-user mirrors of Google data. Uniqueness is scoped to the owning user so two
//! users who see the same message keep separate rows.

use sea_orm_migration::prelude::*;

use crate::m2025_01_01_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Emails::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Emails::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Emails::UserId).uuid().not_null())
                    .col(ColumnDef::new(Emails::GoogleMessageId).text().not_null())
                    .col(ColumnDef::new(Emails::ThreadId).text().null())
                    .col(ColumnDef::new(Emails::Subject).text().null())
                    .col(ColumnDef::new(Emails::SenderEmail).text().null())
                    .col(ColumnDef::new(Emails::SenderName).text().null())
                    .col(ColumnDef::new(Emails::Recipients).json_binary().not_null())
                    .col(ColumnDef::new(Emails::Cc).json_binary().not_null())
                    .col(ColumnDef::new(Emails::Content).text().null())
                    .col(ColumnDef::new(Emails::HtmlContent).text().null())
                    .col(ColumnDef::new(Emails::Snippet).text().null())
                    .col(ColumnDef::new(Emails::Labels).json_binary().not_null())
                    .col(
                        ColumnDef::new(Emails::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Emails::IsStarred)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Emails::IsImportant)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Emails::IsTrash)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Emails::ReceivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Emails::EmbeddingText).text().null())
                    .col(ColumnDef::new(Emails::Embedding).json_binary().null())
                    .col(
                        ColumnDef::new(Emails::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Emails::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_emails_user_id")
                            .from(Emails::Table, Emails::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_user_google_message_id")
                    .table(Emails::Table)
                    .col(Emails::UserId)
                    .col(Emails::GoogleMessageId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_user_received_at")
                    .table(Emails::Table)
                    .col(Emails::UserId)
                    .col(Emails::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CalendarEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CalendarEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CalendarEvents::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(CalendarEvents::GoogleEventId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CalendarEvents::CalendarId).text().not_null())
                    .col(ColumnDef::new(CalendarEvents::CalendarName).text().null())
                    .col(ColumnDef::new(CalendarEvents::Summary).text().null())
                    .col(ColumnDef::new(CalendarEvents::Description).text().null())
                    .col(ColumnDef::new(CalendarEvents::Location).text().null())
                    .col(
                        ColumnDef::new(CalendarEvents::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::EndTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::IsAllDay)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(CalendarEvents::EventType).text().null())
                    .col(
                        ColumnDef::new(CalendarEvents::Attendees)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CalendarEvents::Organizer).json_binary().null())
                    .col(ColumnDef::new(CalendarEvents::Status).text().null())
                    .col(ColumnDef::new(CalendarEvents::Visibility).text().null())
                    .col(
                        ColumnDef::new(CalendarEvents::ConferenceData)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::RecurringEventId)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(CalendarEvents::IcalUid).text().null())
                    .col(ColumnDef::new(CalendarEvents::Sequence).integer().null())
                    .col(ColumnDef::new(CalendarEvents::EmbeddingText).text().null())
                    .col(ColumnDef::new(CalendarEvents::Embedding).json_binary().null())
                    .col(
                        ColumnDef::new(CalendarEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_events_user_id")
                            .from(CalendarEvents::Table, CalendarEvents::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_calendar_events_user_google_event_id")
                    .table(CalendarEvents::Table)
                    .col(CalendarEvents::UserId)
                    .col(CalendarEvents::GoogleEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_calendar_events_user_start_time")
                    .table(CalendarEvents::Table)
                    .col(CalendarEvents::UserId)
                    .col(CalendarEvents::StartTime)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CalendarEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Emails::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Emails {
    Table,
    Id,
    UserId,
    GoogleMessageId,
    ThreadId,
    Subject,
    SenderEmail,
    SenderName,
    Recipients,
    Cc,
    Content,
    HtmlContent,
    Snippet,
    Labels,
    IsRead,
    IsStarred,
    IsImportant,
    IsTrash,
    ReceivedAt,
    EmbeddingText,
    Embedding,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CalendarEvents {
    Table,
    Id,
    UserId,
    GoogleEventId,
    CalendarId,
    CalendarName,
    Summary,
    Description,
    Location,
    StartTime,
    EndTime,
    IsAllDay,
    EventType,
    Attendees,
    Organizer,
    Status,
    Visibility,
    ConferenceData,
    RecurringEventId,
    IcalUid,
    Sequence,
    EmbeddingText,
    Embedding,
    CreatedAt,
    UpdatedAt,
}
