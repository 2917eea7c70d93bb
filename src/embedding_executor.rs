//! Embedding Executor
//!
//! Drains the embedding queue: claims pending items one at a time, generates a vector for
//! each, writes it back to the referenced email or calendar event, and records the outcome.
//! A claim is a compare-and-set on `status = 'pending'`, so overlapping cron triggers never
//! process the same item twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::connectors::ProviderError;
use crate::connectors::openai::{EmbeddingProvider, prepare_text};
use crate::models::embedding_queue::{self, ContentType};
use crate::repositories::embedding_queue::QueueStats;
use crate::repositories::{CalendarEventRepository, EmailRepository, EmbeddingQueueRepository};

/// Per-batch counters returned to callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BatchResult {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub deleted: u64,
    pub recovered: u64,
}

#[derive(Debug, Error)]
enum ItemError {
    #[error("unknown content type '{0}'")]
    UnknownContentType(String),
    #[error("nothing to embed")]
    EmptyText,
    #[error("{content_type} {content_id} no longer exists")]
    MissingContent {
        content_type: ContentType,
        content_id: uuid::Uuid,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

#[derive(Clone)]
pub struct EmbeddingExecutor {
    queue: EmbeddingQueueRepository,
    emails: EmailRepository,
    events: CalendarEventRepository,
    embedder: Arc<dyn EmbeddingProvider>,
    item_delay: Duration,
}

impl EmbeddingExecutor {
    pub fn new(
        queue: EmbeddingQueueRepository,
        emails: EmailRepository,
        events: CalendarEventRepository,
        embedder: Arc<dyn EmbeddingProvider>,
        item_delay: Duration,
    ) -> Self {
        Self {
            queue,
            emails,
            events,
            embedder,
            item_delay,
        }
    }

    /// Processes up to `batch_size` pending items, oldest first.
    #[instrument(skip(self))]
    pub async fn process_batch(&self, batch_size: u64) -> Result<BatchResult, DbErr> {
        let items = self.queue.pending_batch(batch_size).await?;
        let mut result = BatchResult::default();
        if items.is_empty() {
            debug!("Embedding queue is empty");
            return Ok(result);
        }

        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            match self.queue.claim(item.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(item_id = %item.id, "Item claimed by another worker");
                    result.skipped += 1;
                    counter!("embedding_items_total", "outcome" => "skipped").increment(1);
                    continue;
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Could not claim queue item");
                    result.skipped += 1;
                    counter!("embedding_items_total", "outcome" => "skipped").increment(1);
                    continue;
                }
            }

            let started = Instant::now();
            let outcome = self.embed_item(&item).await;
            let finished = match &outcome {
                Ok(()) => self.queue.complete(item.id, &item.text).await?,
                Err(e) => {
                    warn!(
                        item_id = %item.id,
                        content_type = %item.content_type,
                        content_id = %item.content_id,
                        error = %e,
                        "Embedding failed"
                    );
                    self.queue.fail(item.id, &item.text, &e.to_string()).await?
                }
            };
            if !finished {
                warn!(item_id = %item.id, "Claim lost before the item finished");
                result.skipped += 1;
                counter!("embedding_items_total", "outcome" => "skipped").increment(1);
            } else if outcome.is_ok() {
                result.processed += 1;
                counter!("embedding_items_total", "outcome" => "completed").increment(1);
            } else {
                result.failed += 1;
                counter!("embedding_items_total", "outcome" => "failed").increment(1);
            }
            histogram!("embedding_item_duration_ms")
                .record(started.elapsed().as_secs_f64() * 1_000.0);

            if index + 1 < total && !self.item_delay.is_zero() {
                sleep(self.item_delay).await;
            }
        }

        info!(
            processed = result.processed,
            failed = result.failed,
            skipped = result.skipped,
            "Embedding batch finished"
        );
        Ok(result)
    }

    async fn embed_item(&self, item: &embedding_queue::Model) -> Result<(), ItemError> {
        let content_type = ContentType::parse(&item.content_type)
            .ok_or_else(|| ItemError::UnknownContentType(item.content_type.clone()))?;
        let text = prepare_text(&item.text);
        if text.is_empty() {
            return Err(ItemError::EmptyText);
        }

        let vector = self.embedder.embed(&text).await?;
        let written = match content_type {
            ContentType::Email => self.emails.set_embedding(item.content_id, &vector).await?,
            ContentType::CalendarEvent => {
                self.events.set_embedding(item.content_id, &vector).await?
            }
        };
        if !written {
            return Err(ItemError::MissingContent {
                content_type,
                content_id: item.content_id,
            });
        }
        Ok(())
    }

    /// Deletes old finished items and requeues items stuck in `processing`.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, days_old: i64, stale_minutes: i64) -> Result<CleanupResult, DbErr> {
        let deleted = self.queue.cleanup(days_old).await?;
        let recovered = self.queue.recover_stale(stale_minutes).await?;
        if recovered > 0 {
            warn!(recovered, "Requeued stale embedding items");
        }
        info!(deleted, recovered, "Embedding queue cleanup finished");
        Ok(CleanupResult { deleted, recovered })
    }

    pub async fn stats(&self) -> Result<QueueStats, DbErr> {
        self.queue.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::email;
    use crate::models::embedding_queue::QueueStatus;
    use crate::repositories::UserRepository;
    use async_trait::async_trait;
    use chrono::Utc;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database, EntityTrait, Set};
    use serde_json::json;
    use uuid::Uuid;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            if text.contains("explode") {
                return Err(ProviderError::Http {
                    provider: "openai",
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(vec![0.25, 0.5])
        }
    }

    struct Fixture {
        executor: EmbeddingExecutor,
        queue: EmbeddingQueueRepository,
        db: Arc<sea_orm::DatabaseConnection>,
    }

    async fn fixture() -> Fixture {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);
        let queue = EmbeddingQueueRepository::new(db.clone());
        let executor = EmbeddingExecutor::new(
            queue.clone(),
            EmailRepository::new(db.clone()),
            CalendarEventRepository::new(db.clone()),
            Arc::new(FixedEmbedder),
            Duration::ZERO,
        );
        Fixture {
            executor,
            queue,
            db,
        }
    }

    async fn insert_email(db: &sea_orm::DatabaseConnection, user_id: Uuid) -> Uuid {
        let now = Utc::now().fixed_offset();
        let id = Uuid::new_v4();
        email::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            google_message_id: Set(format!("msg-{}", id)),
            thread_id: Set(None),
            subject: Set(Some("Quarterly review".into())),
            sender_email: Set(None),
            sender_name: Set(None),
            recipients: Set(json!([])),
            cc: Set(json!([])),
            content: Set(None),
            html_content: Set(None),
            snippet: Set(None),
            labels: Set(json!([])),
            is_read: Set(false),
            is_starred: Set(false),
            is_important: Set(false),
            is_trash: Set(false),
            received_at: Set(None),
            embedding_text: Set(None),
            embedding: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn batch_completes_fails_and_writes_vectors() {
        let f = fixture().await;
        let user = UserRepository::new(f.db.clone())
            .get_or_create("user_1")
            .await
            .unwrap();
        let good = insert_email(&f.db, user.id).await;
        let bad = insert_email(&f.db, user.id).await;

        f.queue
            .enqueue_many(vec![
                (ContentType::Email, good, "Quarterly   review".into()),
                (ContentType::Email, bad, "please explode".into()),
                (ContentType::CalendarEvent, Uuid::new_v4(), "gone event".into()),
            ])
            .await
            .unwrap();

        let result = f.executor.process_batch(10).await.unwrap();
        assert_eq!(
            result,
            BatchResult {
                processed: 1,
                failed: 2,
                skipped: 0
            }
        );

        let stored = crate::models::Email::find_by_id(good)
            .one(&*f.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.embedding, Some(json!([0.25, 0.5])));

        let stats = f.executor.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn processing_items_are_left_alone() {
        let f = fixture().await;
        f.queue
            .enqueue_many(vec![(ContentType::Email, Uuid::new_v4(), "text".into())])
            .await
            .unwrap();
        let item = f.queue.pending_batch(1).await.unwrap().remove(0);

        // Another worker owns the item
        assert!(f.queue.claim(item.id).await.unwrap());

        let result = f.executor.process_batch(10).await.unwrap();
        assert_eq!(result, BatchResult::default());
        let stored = f.queue.find(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Processing.as_str());
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn cleanup_reports_nothing_on_fresh_queue() {
        let f = fixture().await;
        let result = f.executor.cleanup(7, 30).await.unwrap();
        assert_eq!(result, CleanupResult::default());
    }

    /// Simulates the cleanup cron requeueing the item mid-embedding.
    struct RecoveringEmbedder {
        queue: EmbeddingQueueRepository,
    }

    #[async_trait]
    impl EmbeddingProvider for RecoveringEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            self.queue.recover_stale(-1).await.unwrap();
            Ok(vec![1.0])
        }
    }

    #[tokio::test]
    async fn lost_claim_counts_as_skipped() {
        let f = fixture().await;
        let user = UserRepository::new(f.db.clone())
            .get_or_create("user_1")
            .await
            .unwrap();
        let email_id = insert_email(&f.db, user.id).await;
        f.queue
            .enqueue(ContentType::Email, email_id, "Quarterly review".into())
            .await
            .unwrap();

        let executor = EmbeddingExecutor::new(
            f.queue.clone(),
            EmailRepository::new(f.db.clone()),
            CalendarEventRepository::new(f.db.clone()),
            Arc::new(RecoveringEmbedder {
                queue: f.queue.clone(),
            }),
            Duration::ZERO,
        );
        let result = executor.process_batch(10).await.unwrap();
        assert_eq!(
            result,
            BatchResult {
                processed: 0,
                failed: 0,
                skipped: 1
            }
        );
        assert_eq!(f.executor.stats().await.unwrap().pending, 1);
    }
}
