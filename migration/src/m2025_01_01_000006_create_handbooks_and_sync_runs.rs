//! Migration to create solution_handbooks and sync_runs.
//!
//! `sync_runs` records each invocation of a sync routine with its counters and the last cursor
//! reached, so a full resync that dies part-way leaves an audit trail.

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
                    .table(SolutionHandbooks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SolutionHandbooks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SolutionHandbooks::UserId).uuid().not_null())
                    .col(ColumnDef::new(SolutionHandbooks::Title).text().not_null())
                    .col(ColumnDef::new(SolutionHandbooks::Prompt).text().null())
                    .col(ColumnDef::new(SolutionHandbooks::HtmlContent).text().null())
                    .col(
                        ColumnDef::new(SolutionHandbooks::IsPublished)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SolutionHandbooks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SolutionHandbooks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_solution_handbooks_user_id")
                            .from(SolutionHandbooks::Table, SolutionHandbooks::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_solution_handbooks_user_created_at")
                    .table(SolutionHandbooks::Table)
                    .col(SolutionHandbooks::UserId)
                    .col(SolutionHandbooks::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SyncRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncRuns::UserId).uuid().null())
                    .col(ColumnDef::new(SyncRuns::Source).text().not_null())
                    .col(ColumnDef::new(SyncRuns::Mode).text().not_null())
                    .col(
                        ColumnDef::new(SyncRuns::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::RecordsFetched)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::RecordsSaved)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::RecordsSkipped)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::Chunks)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncRuns::LastCursor).text().null())
                    .col(ColumnDef::new(SyncRuns::Errors).json_binary().null())
                    .col(
                        ColumnDef::new(SyncRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_user_started_at")
                    .table(SyncRuns::Table)
                    .col(SyncRuns::UserId)
                    .col(SyncRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncRuns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SolutionHandbooks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SolutionHandbooks {
    Table,
    Id,
    UserId,
    Title,
    Prompt,
    HtmlContent,
    IsPublished,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
    UserId,
    Source,
    Mode,
    Status,
    RecordsFetched,
    RecordsSaved,
    RecordsSkipped,
    Chunks,
    LastCursor,
    Errors,
    StartedAt,
    FinishedAt,
}
