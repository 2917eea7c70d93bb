//! # Sync-and-upsert
//!
//! Every importer (HubSpot, Gmail, Calendar, WhatsApp, Slack) runs the same loop: page through a
//! provider with a [`RecordSource`], hand each chunk to a [`RecordSink`] that upserts by external
//! id, optionally enqueue embedding work, then sleep before the next chunk.
//!
//! Failure policy:
//! * a sub-item the source could not fetch is counted in `skipped` and dropped;
//! * a failed listing call or a failed upsert ends the run; earlier chunks stay committed.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connectors::ProviderError;
use crate::models::embedding_queue::ContentType;
use crate::repositories::EmbeddingQueueRepository;
use crate::repositories::SyncRunRepository;
use crate::repositories::sync_run::RunTotals;
use crate::token_refresh::TokenError;

pub mod associations;
pub mod calendar;
pub mod conversation;
pub mod gmail;
pub mod hubspot;
pub mod orchestrator;
pub mod periskope;
pub mod slack;

/// Failure that ends a sync run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One page of provider records
#[derive(Debug)]
pub struct Chunk<R> {
    pub records: Vec<R>,
    /// Sub-items the source listed but could not fetch
    pub skipped: u64,
    pub next_cursor: Option<String>,
}

/// Text to embed for a record that was just saved
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCandidate {
    pub content_type: ContentType,
    pub content_id: Uuid,
    pub text: String,
}

#[async_trait]
pub trait RecordSource: Send {
    type Record: Send;

    /// Label used for the run row and metrics, e.g. `gmail`
    fn name(&self) -> &str;

    async fn next_chunk(
        &mut self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Chunk<Self::Record>, SyncError>;
}

#[async_trait]
pub trait RecordSink<R: Send>: Send + Sync {
    /// Upserts by external id and returns the embedding work for the saved rows.
    async fn upsert(&self, records: Vec<R>) -> Result<Vec<EmbeddingCandidate>, SyncError>;
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub page_size: usize,
    pub max_records: usize,
    pub chunk_delay: Duration,
    pub enqueue_embeddings: bool,
    /// Resume point; `None` starts from the beginning
    pub start_cursor: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_records: 10_000,
            chunk_delay: Duration::from_millis(1000),
            enqueue_embeddings: false,
            start_cursor: None,
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub fetched: u64,
    pub saved: u64,
    pub skipped: u64,
    pub chunks: u32,
    pub last_cursor: Option<String>,
    /// The provider ran out of pages before the record cap or an error
    pub completed: bool,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl SyncOutcome {
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            fetched: self.fetched,
            saved: self.saved,
            skipped: self.skipped,
            chunks: self.chunks,
            last_cursor: self.last_cursor.clone(),
            errors: self.errors.clone(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds another run's counters, keeping this run's cursor
    pub fn absorb(&mut self, other: &SyncOutcome) {
        self.fetched += other.fetched;
        self.saved += other.saved;
        self.skipped += other.skipped;
        self.chunks += other.chunks;
        self.errors.extend(other.errors.iter().cloned());
    }
}

/// Pages `source` into `sink` until the provider is exhausted, the record cap is reached, or a
/// chunk fails.
pub async fn run_chunked<S, K>(
    source: &mut S,
    sink: &K,
    queue: Option<&EmbeddingQueueRepository>,
    options: &SyncOptions,
) -> SyncOutcome
where
    S: RecordSource,
    K: RecordSink<S::Record>,
{
    let name = source.name().to_string();
    let mut outcome = SyncOutcome::default();
    let mut cursor = options.start_cursor.clone();
    let page_size = options.page_size.max(1);

    loop {
        let remaining = options.max_records.saturating_sub(outcome.fetched as usize);
        if remaining == 0 {
            info!(source = %name, fetched = outcome.fetched, "Record cap reached");
            break;
        }

        let chunk = match source
            .next_chunk(cursor.as_deref(), page_size.min(remaining))
            .await
        {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(source = %name, chunk = outcome.chunks + 1, error = %e, "Chunk fetch failed");
                outcome.errors.push(e.to_string());
                break;
            }
        };

        outcome.chunks += 1;
        outcome.skipped += chunk.skipped;
        let count = chunk.records.len() as u64;
        outcome.fetched += count + chunk.skipped;

        if count > 0 {
            match sink.upsert(chunk.records).await {
                Ok(candidates) => {
                    outcome.saved += count;
                    metrics::counter!("sync_records_saved_total", "source" => name.clone())
                        .increment(count);
                    if options.enqueue_embeddings
                        && let Some(queue) = queue
                    {
                        enqueue_candidates(queue, &name, candidates).await;
                    }
                }
                Err(e) => {
                    warn!(source = %name, chunk = outcome.chunks, error = %e, "Upsert failed");
                    outcome.errors.push(e.to_string());
                    break;
                }
            }
        }

        debug!(
            source = %name,
            chunk = outcome.chunks,
            records = count,
            skipped = chunk.skipped,
            "Chunk saved"
        );

        match chunk.next_cursor {
            Some(next) => {
                outcome.last_cursor = Some(next.clone());
                cursor = Some(next);
            }
            None => {
                outcome.completed = true;
                break;
            }
        }

        if (outcome.fetched as usize) < options.max_records && !options.chunk_delay.is_zero() {
            sleep(options.chunk_delay).await;
        }
    }

    outcome
}

/// Runs [`run_chunked`] inside a `sync_runs` row.
pub async fn run_recorded<S, K>(
    runs: &SyncRunRepository,
    user_id: Option<Uuid>,
    mode: &str,
    source: &mut S,
    sink: &K,
    queue: Option<&EmbeddingQueueRepository>,
    options: &SyncOptions,
) -> Result<SyncOutcome, SyncError>
where
    S: RecordSource,
    K: RecordSink<S::Record>,
{
    let run = runs.start(user_id, source.name(), mode).await?;
    info!(run_id = %run.id, source = %run.source, mode, "Sync run started");

    let mut outcome = run_chunked(source, sink, queue, options).await;
    outcome.run_id = Some(run.id);

    if let Err(e) = runs.finish(&run, &outcome.totals()).await {
        warn!(run_id = %run.id, error = %e, "Failed to close sync run");
    }
    info!(
        run_id = %run.id,
        fetched = outcome.fetched,
        saved = outcome.saved,
        skipped = outcome.skipped,
        completed = outcome.completed,
        "Sync run finished"
    );
    Ok(outcome)
}

/// Enqueues non-empty candidates; failures are logged and never fail the sync.
pub async fn enqueue_candidates(
    queue: &EmbeddingQueueRepository,
    source: &str,
    candidates: Vec<EmbeddingCandidate>,
) {
    let items: Vec<_> = candidates
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .map(|c| (c.content_type, c.content_id, c.text))
        .collect();
    if items.is_empty() {
        return;
    }
    if let Err(e) = queue.enqueue_many(items).await {
        warn!(source, error = %e, "Failed to enqueue embeddings");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::sync::{Arc, Mutex};

    /// Serves numbered records in pages, failing on request
    struct CountingSource {
        total: usize,
        fail_at_chunk: Option<u32>,
        calls: u32,
    }

    #[async_trait]
    impl RecordSource for CountingSource {
        type Record = usize;

        fn name(&self) -> &str {
            "test"
        }

        async fn next_chunk(
            &mut self,
            cursor: Option<&str>,
            page_size: usize,
        ) -> Result<Chunk<usize>, SyncError> {
            self.calls += 1;
            if self.fail_at_chunk == Some(self.calls) {
                return Err(SyncError::Other(anyhow::anyhow!("listing failed")));
            }
            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (start + page_size).min(self.total);
            Ok(Chunk {
                records: (start..end).collect(),
                skipped: 0,
                next_cursor: (end < self.total).then(|| end.to_string()),
            })
        }
    }

    #[derive(Default)]
    struct VecSink {
        saved: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordSink<usize> for VecSink {
        async fn upsert(&self, records: Vec<usize>) -> Result<Vec<EmbeddingCandidate>, SyncError> {
            if self.fail {
                return Err(SyncError::Database(DbErr::Custom("insert failed".into())));
            }
            let candidates = records
                .iter()
                .map(|n| EmbeddingCandidate {
                    content_type: ContentType::Email,
                    content_id: Uuid::new_v4(),
                    text: if n % 2 == 0 { format!("record {n}") } else { String::new() },
                })
                .collect();
            self.saved.lock().unwrap().extend(records);
            Ok(candidates)
        }
    }

    fn options(page_size: usize, max_records: usize) -> SyncOptions {
        SyncOptions {
            page_size,
            max_records,
            chunk_delay: Duration::ZERO,
            enqueue_embeddings: true,
            start_cursor: None,
        }
    }

    #[tokio::test]
    async fn pages_until_the_source_is_exhausted() {
        let mut source = CountingSource {
            total: 7,
            fail_at_chunk: None,
            calls: 0,
        };
        let sink = VecSink::default();

        let outcome = run_chunked(&mut source, &sink, None, &options(3, 100)).await;

        assert!(outcome.completed);
        assert_eq!(outcome.fetched, 7);
        assert_eq!(outcome.saved, 7);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(outcome.last_cursor.as_deref(), Some("6"));
        assert_eq!(*sink.saved.lock().unwrap(), (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stops_at_the_record_cap() {
        let mut source = CountingSource {
            total: 50,
            fail_at_chunk: None,
            calls: 0,
        };
        let sink = VecSink::default();

        let outcome = run_chunked(&mut source, &sink, None, &options(4, 10)).await;

        assert!(!outcome.completed);
        assert_eq!(outcome.fetched, 10);
        assert_eq!(outcome.chunks, 3);
    }

    #[tokio::test]
    async fn listing_failure_keeps_earlier_chunks() {
        let mut source = CountingSource {
            total: 10,
            fail_at_chunk: Some(2),
            calls: 0,
        };
        let sink = VecSink::default();

        let outcome = run_chunked(&mut source, &sink, None, &options(4, 100)).await;

        assert!(!outcome.completed);
        assert_eq!(outcome.saved, 4);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn upsert_failure_aborts_the_run() {
        let mut source = CountingSource {
            total: 10,
            fail_at_chunk: None,
            calls: 0,
        };
        let sink = VecSink {
            fail: true,
            ..Default::default()
        };

        let outcome = run_chunked(&mut source, &sink, None, &options(4, 100)).await;

        assert_eq!(outcome.saved, 0);
        assert_eq!(outcome.chunks, 1);
        assert!(outcome.errors[0].contains("insert failed"));
    }

    #[tokio::test]
    async fn recorded_run_enqueues_only_non_empty_text() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);
        let runs = SyncRunRepository::new(db.clone());
        let queue = EmbeddingQueueRepository::new(db);

        let mut source = CountingSource {
            total: 4,
            fail_at_chunk: None,
            calls: 0,
        };
        let sink = VecSink::default();

        let outcome = run_recorded(
            &runs,
            None,
            "full",
            &mut source,
            &sink,
            Some(&queue),
            &options(10, 100),
        )
        .await
        .unwrap();

        assert_eq!(queue.stats().await.unwrap().pending, 2);
        let run = runs.find(outcome.run_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(run.status, "succeeded");
        assert_eq!(run.records_saved, 4);
        assert_eq!(run.source, "test");
    }
}
