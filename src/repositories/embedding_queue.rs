//! Embedding queue repository
//!
//! Status moves `pending -> processing -> completed | failed`. Claiming is a conditional update
//! on `status = 'pending'`, so two workers can never both own an item. Stale `processing` items
//! go back to `pending` through [`EmbeddingQueueRepository::recover_stale`].
//!
//! Re-enqueueing content that is being processed only swaps the text; the worker that owns the
//! item sends it back to `pending` when it finishes if the text it embedded is no longer current.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::sea_query::{Expr, OnConflict, SimpleExpr};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::EmbeddingQueue;
use crate::models::embedding_queue::{self, ContentType, QueueStatus};

/// Longest error message persisted on a failed item
const MAX_ERROR_LEN: usize = 1000;

/// Item counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingQueueRepository {
    db: Arc<DatabaseConnection>,
}

impl EmbeddingQueueRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Enqueues content. An existing item for the same content gets the new text and goes back
    /// to `pending`, unless a worker currently owns it.
    pub async fn enqueue_many(
        &self,
        items: Vec<(ContentType, Uuid, String)>,
    ) -> Result<u64, DbErr> {
        if items.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().fixed_offset();
        let count = items.len() as u64;
        let rows = items
            .into_iter()
            .map(|(content_type, content_id, text)| embedding_queue::ActiveModel {
                id: Set(Uuid::new_v4()),
                content_type: Set(content_type.as_str().to_string()),
                content_id: Set(content_id),
                text: Set(text),
                status: Set(QueueStatus::Pending.as_str().to_string()),
                attempts: Set(0),
                error_message: Set(None),
                processed_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            });

        EmbeddingQueue::insert_many(rows)
            .on_conflict(
                OnConflict::columns([
                    embedding_queue::Column::ContentType,
                    embedding_queue::Column::ContentId,
                ])
                .update_columns([
                    embedding_queue::Column::Text,
                    embedding_queue::Column::ErrorMessage,
                    embedding_queue::Column::ProcessedAt,
                    embedding_queue::Column::UpdatedAt,
                ])
                .value(embedding_queue::Column::Status, requeued_status())
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(count)
    }

    pub async fn enqueue(
        &self,
        content_type: ContentType,
        content_id: Uuid,
        text: String,
    ) -> Result<(), DbErr> {
        self.enqueue_many(vec![(content_type, content_id, text)])
            .await
            .map(|_| ())
    }

    /// Oldest pending items first
    pub async fn pending_batch(&self, limit: u64) -> Result<Vec<embedding_queue::Model>, DbErr> {
        EmbeddingQueue::find()
            .filter(embedding_queue::Column::Status.eq(QueueStatus::Pending.as_str()))
            .order_by_asc(embedding_queue::Column::CreatedAt)
            .order_by_asc(embedding_queue::Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Atomically moves a pending item to `processing`. `false` means another worker has it.
    pub async fn claim(&self, id: Uuid) -> Result<bool, DbErr> {
        let result = EmbeddingQueue::update_many()
            .col_expr(
                embedding_queue::Column::Status,
                Expr::value(QueueStatus::Processing.as_str()),
            )
            .col_expr(
                embedding_queue::Column::Attempts,
                Expr::col(embedding_queue::Column::Attempts).add(1),
            )
            .col_expr(
                embedding_queue::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(embedding_queue::Column::Id.eq(id))
            .filter(embedding_queue::Column::Status.eq(QueueStatus::Pending.as_str()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Finishes a claimed item as `completed`. Returns `false` when the claim was lost.
    pub async fn complete(&self, id: Uuid, claimed_text: &str) -> Result<bool, DbErr> {
        self.finish(id, claimed_text, QueueStatus::Completed, None).await
    }

    /// Finishes a claimed item as `failed`. Returns `false` when the claim was lost.
    pub async fn fail(&self, id: Uuid, claimed_text: &str, error: &str) -> Result<bool, DbErr> {
        let message: String = error.chars().take(MAX_ERROR_LEN).collect();
        self.finish(id, claimed_text, QueueStatus::Failed, Some(message)).await
    }

    /// `processing -> outcome`, or back to `pending` if the text changed while it was claimed.
    async fn finish(
        &self,
        id: Uuid,
        claimed_text: &str,
        outcome: QueueStatus,
        error: Option<String>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let status: SimpleExpr = Expr::case(
            Expr::col(embedding_queue::Column::Text).eq(claimed_text),
            outcome.as_str(),
        )
        .finally(QueueStatus::Pending.as_str())
        .into();
        let result = EmbeddingQueue::update_many()
            .col_expr(embedding_queue::Column::Status, status)
            .col_expr(embedding_queue::Column::ErrorMessage, Expr::value(error))
            .col_expr(embedding_queue::Column::ProcessedAt, Expr::value(now))
            .col_expr(embedding_queue::Column::UpdatedAt, Expr::value(now))
            .filter(embedding_queue::Column::Id.eq(id))
            .filter(embedding_queue::Column::Status.eq(QueueStatus::Processing.as_str()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Deletes finished items last touched more than `days_old` days ago.
    pub async fn cleanup(&self, days_old: i64) -> Result<u64, DbErr> {
        let cutoff = (Utc::now() - Duration::days(days_old)).fixed_offset();
        let result = EmbeddingQueue::delete_many()
            .filter(embedding_queue::Column::Status.is_in([
                QueueStatus::Completed.as_str(),
                QueueStatus::Failed.as_str(),
            ]))
            .filter(embedding_queue::Column::UpdatedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Returns `processing` items stuck longer than `older_than_minutes` to `pending`.
    pub async fn recover_stale(&self, older_than_minutes: i64) -> Result<u64, DbErr> {
        let now = Utc::now();
        let cutoff = (now - Duration::minutes(older_than_minutes)).fixed_offset();
        let result = EmbeddingQueue::update_many()
            .col_expr(
                embedding_queue::Column::Status,
                Expr::value(QueueStatus::Pending.as_str()),
            )
            .col_expr(
                embedding_queue::Column::UpdatedAt,
                Expr::value(now.fixed_offset()),
            )
            .filter(embedding_queue::Column::Status.eq(QueueStatus::Processing.as_str()))
            .filter(embedding_queue::Column::UpdatedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn stats(&self) -> Result<QueueStats, DbErr> {
        let count = |status: QueueStatus| {
            EmbeddingQueue::find()
                .filter(embedding_queue::Column::Status.eq(status.as_str()))
                .count(&*self.db)
        };
        Ok(QueueStats {
            pending: count(QueueStatus::Pending).await?,
            processing: count(QueueStatus::Processing).await?,
            completed: count(QueueStatus::Completed).await?,
            failed: count(QueueStatus::Failed).await?,
        })
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<embedding_queue::Model>, DbErr> {
        EmbeddingQueue::find_by_id(id).one(&*self.db).await
    }
}

/// Status written when enqueue hits an existing row: owned items stay `processing`.
fn requeued_status() -> SimpleExpr {
    let current = Expr::col((EmbeddingQueue, embedding_queue::Column::Status));
    Expr::case(current.clone().eq(QueueStatus::Processing.as_str()), current)
        .finally(QueueStatus::Pending.as_str())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database};

    async fn repo() -> EmbeddingQueueRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        EmbeddingQueueRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn re_enqueue_resets_instead_of_duplicating() {
        let repo = repo().await;
        let content_id = Uuid::new_v4();
        repo.enqueue(ContentType::Email, content_id, "v1".into())
            .await
            .unwrap();

        let item = repo.pending_batch(10).await.unwrap().remove(0);
        assert!(repo.claim(item.id).await.unwrap());
        assert!(repo.fail(item.id, "v1", "boom").await.unwrap());

        repo.enqueue(ContentType::Email, content_id, "v2".into())
            .await
            .unwrap();

        let pending = repo.pending_batch(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, item.id);
        assert_eq!(pending[0].text, "v2");
        assert!(pending[0].error_message.is_none());
    }

    #[tokio::test]
    async fn claim_succeeds_only_once() {
        let repo = repo().await;
        repo.enqueue(ContentType::CalendarEvent, Uuid::new_v4(), "x".into())
            .await
            .unwrap();
        let item = repo.pending_batch(1).await.unwrap().remove(0);

        assert!(repo.claim(item.id).await.unwrap());
        assert!(!repo.claim(item.id).await.unwrap());

        let claimed = repo.find(item.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, "processing");
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn complete_only_applies_to_processing_items() {
        let repo = repo().await;
        repo.enqueue(ContentType::Email, Uuid::new_v4(), "x".into())
            .await
            .unwrap();
        let item = repo.pending_batch(1).await.unwrap().remove(0);

        // pending -> completed is not a legal transition
        assert!(!repo.complete(item.id, "x").await.unwrap());
        assert_eq!(repo.find(item.id).await.unwrap().unwrap().status, "pending");

        repo.claim(item.id).await.unwrap();
        assert!(repo.complete(item.id, "x").await.unwrap());
        let done = repo.find(item.id).await.unwrap().unwrap();
        assert_eq!(done.status, "completed");
        assert!(done.processed_at.is_some());
    }

    #[tokio::test]
    async fn cleanup_and_stale_recovery_respect_age() {
        let repo = repo().await;
        for _ in 0..3 {
            repo.enqueue(ContentType::Email, Uuid::new_v4(), "x".into())
                .await
                .unwrap();
        }
        let items = repo.pending_batch(3).await.unwrap();
        let old = (Utc::now() - Duration::days(10)).fixed_offset();

        // completed long ago
        repo.claim(items[0].id).await.unwrap();
        repo.complete(items[0].id, "x").await.unwrap();
        // stuck in processing
        repo.claim(items[1].id).await.unwrap();
        for id in [items[0].id, items[1].id] {
            let mut row: embedding_queue::ActiveModel =
                repo.find(id).await.unwrap().unwrap().into();
            row.updated_at = Set(old);
            row.update(&*repo.db).await.unwrap();
        }

        assert_eq!(repo.cleanup(7).await.unwrap(), 1);
        assert_eq!(repo.recover_stale(30).await.unwrap(), 1);

        let stats = repo.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 2,
                processing: 0,
                completed: 0,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn re_enqueue_while_processing_keeps_the_claim() {
        let repo = repo().await;
        let content_id = Uuid::new_v4();
        repo.enqueue(ContentType::Email, content_id, "v1".into())
            .await
            .unwrap();
        let item = repo.pending_batch(1).await.unwrap().remove(0);
        assert!(repo.claim(item.id).await.unwrap());

        repo.enqueue(ContentType::Email, content_id, "v2".into())
            .await
            .unwrap();
        let stored = repo.find(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, "processing");
        assert_eq!(stored.text, "v2");
        assert!(repo.pending_batch(10).await.unwrap().is_empty());
        assert!(!repo.claim(item.id).await.unwrap());

        // The owner embedded "v1", so the item goes back for the new text
        assert!(repo.complete(item.id, "v1").await.unwrap());
        assert_eq!(repo.find(item.id).await.unwrap().unwrap().status, "pending");

        assert!(repo.claim(item.id).await.unwrap());
        assert!(repo.complete(item.id, "v2").await.unwrap());
        assert_eq!(repo.find(item.id).await.unwrap().unwrap().status, "completed");
    }

    #[tokio::test]
    async fn finishing_a_recovered_item_reports_lost_claim() {
        let repo = repo().await;
        repo.enqueue(ContentType::Email, Uuid::new_v4(), "x".into())
            .await
            .unwrap();
        let item = repo.pending_batch(1).await.unwrap().remove(0);
        assert!(repo.claim(item.id).await.unwrap());

        // Negative age makes every processing item stale
        assert_eq!(repo.recover_stale(-1).await.unwrap(), 1);

        assert!(!repo.complete(item.id, "x").await.unwrap());
        assert!(!repo.fail(item.id, "x", "boom").await.unwrap());
        assert_eq!(repo.find(item.id).await.unwrap().unwrap().status, "pending");
    }
}
