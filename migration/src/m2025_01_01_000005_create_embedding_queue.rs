//! Migration to create the embedding_queue table.
//!
//! Items move pending -> processing -> completed | failed. The (content_type, content_id)
//! unique index makes enqueue an upsert.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmbeddingQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmbeddingQueue::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EmbeddingQueue::ContentType).text().not_null())
                    .col(ColumnDef::new(EmbeddingQueue::ContentId).uuid().not_null())
                    .col(ColumnDef::new(EmbeddingQueue::Text).text().not_null())
                    .col(
                        ColumnDef::new(EmbeddingQueue::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(EmbeddingQueue::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(EmbeddingQueue::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(EmbeddingQueue::ProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(EmbeddingQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EmbeddingQueue::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_embedding_queue_content")
                    .table(EmbeddingQueue::Table)
                    .col(EmbeddingQueue::ContentType)
                    .col(EmbeddingQueue::ContentId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_embedding_queue_status_created_at")
                    .table(EmbeddingQueue::Table)
                    .col(EmbeddingQueue::Status)
                    .col(EmbeddingQueue::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_embedding_queue_status_created_at")
                    .table(EmbeddingQueue::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_embedding_queue_content")
                    .table(EmbeddingQueue::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(EmbeddingQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EmbeddingQueue {
    Table,
    Id,
    ContentType,
    ContentId,
    Text,
    Status,
    Attempts,
    ErrorMessage,
    ProcessedAt,
    CreatedAt,
    UpdatedAt,
}
