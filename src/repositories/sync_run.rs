//! Sync run repository
//!
//! One row per sync invocation. Rows start `running` and are closed exactly once as
//! `succeeded` or `failed` with the final counters.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::cursor::{CursorData, encode_cursor};
use crate::models::SyncRun;
use crate::models::sync_run;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const MODE_FULL: &str = "full";
pub const MODE_INCREMENTAL: &str = "incremental";

/// Final counters written when a run closes
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub fetched: u64,
    pub saved: u64,
    pub skipped: u64,
    pub chunks: u32,
    pub last_cursor: Option<String>,
    pub errors: Vec<String>,
}

/// Filters for listing runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub source: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncRunRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncRunRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn start(
        &self,
        user_id: Option<Uuid>,
        source: &str,
        mode: &str,
    ) -> Result<sync_run::Model, DbErr> {
        let run = sync_run::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            source: Set(source.to_string()),
            mode: Set(mode.to_string()),
            status: Set(STATUS_RUNNING.to_string()),
            records_fetched: Set(0),
            records_saved: Set(0),
            records_skipped: Set(0),
            chunks: Set(0),
            last_cursor: Set(None),
            errors: Set(None),
            // Postgres keeps microseconds; truncating keeps cursors exact
            started_at: Set(Utc::now().trunc_subsecs(6).fixed_offset()),
            finished_at: Set(None),
        };
        run.insert(&*self.db).await
    }

    /// Closes a run. A run with any error is recorded as failed.
    pub async fn finish(&self, run: &sync_run::Model, totals: &RunTotals) -> Result<(), DbErr> {
        let status = if totals.errors.is_empty() {
            STATUS_SUCCEEDED
        } else {
            STATUS_FAILED
        };
        let errors = if totals.errors.is_empty() {
            None
        } else {
            Some(Value::from(totals.errors.clone()))
        };

        let update = sync_run::ActiveModel {
            id: Set(run.id),
            status: Set(status.to_string()),
            records_fetched: Set(totals.fetched as i64),
            records_saved: Set(totals.saved as i64),
            records_skipped: Set(totals.skipped as i64),
            chunks: Set(totals.chunks as i32),
            last_cursor: Set(totals.last_cursor.clone()),
            errors: Set(errors),
            finished_at: Set(Some(Utc::now().fixed_offset())),
            ..Default::default()
        };
        update.update(&*self.db).await?;

        metrics::counter!(
            "sync_runs_total",
            "source" => run.source.clone(),
            "status" => status
        )
        .increment(1);
        Ok(())
    }

    pub async fn find(&self, run_id: Uuid) -> Result<Option<sync_run::Model>, DbErr> {
        SyncRun::find_by_id(run_id).one(&*self.db).await
    }

    /// Lists a user's runs newest first with keyset pagination on (started_at, id).
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        filter: &RunFilter,
        limit: u64,
        cursor: Option<&CursorData>,
    ) -> Result<(Vec<sync_run::Model>, Option<String>), DbErr> {
        let mut query = SyncRun::find()
            .filter(sync_run::Column::UserId.eq(user_id))
            .order_by_desc(sync_run::Column::StartedAt)
            .order_by_desc(sync_run::Column::Id);

        if let Some(source) = &filter.source {
            query = query.filter(sync_run::Column::Source.eq(source.as_str()));
        }
        if let Some(status) = &filter.status {
            query = query.filter(sync_run::Column::Status.eq(status.as_str()));
        }
        if let Some(cursor) = cursor {
            query = query.filter(
                Condition::any()
                    .add(sync_run::Column::StartedAt.lt(cursor.at))
                    .add(
                        Condition::all()
                            .add(sync_run::Column::StartedAt.eq(cursor.at))
                            .add(sync_run::Column::Id.lt(cursor.id)),
                    ),
            );
        }

        let mut rows = query.limit(limit + 1).all(&*self.db).await?;
        let next_cursor = if rows.len() as u64 > limit {
            rows.truncate(limit as usize);
            rows.last().map(|last| encode_cursor(&last.started_at, &last.id))
        } else {
            None
        };
        Ok((rows, next_cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::decode_cursor;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn repo() -> SyncRunRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        SyncRunRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn finish_records_counters_and_status() {
        let repo = repo().await;
        let ok = repo.start(None, "hubspot_companies", MODE_FULL).await.unwrap();
        let bad = repo.start(None, "hubspot_deals", MODE_FULL).await.unwrap();

        repo.finish(
            &ok,
            &RunTotals {
                fetched: 5,
                saved: 5,
                chunks: 1,
                last_cursor: Some("after-5".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        repo.finish(
            &bad,
            &RunTotals {
                errors: vec!["hubspot: upstream returned 500".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let ok = repo.find(ok.id).await.unwrap().unwrap();
        assert_eq!(ok.status, STATUS_SUCCEEDED);
        assert_eq!(ok.records_saved, 5);
        assert_eq!(ok.last_cursor.as_deref(), Some("after-5"));
        assert!(ok.finished_at.is_some());

        let bad = repo.find(bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, STATUS_FAILED);
        assert!(bad.errors.is_some());
    }

    #[tokio::test]
    async fn list_for_user_pages_newest_first() {
        let repo = repo().await;
        let user_id = Uuid::new_v4();
        for source in ["gmail", "google_calendar", "gmail"] {
            repo.start(Some(user_id), source, MODE_FULL).await.unwrap();
        }
        repo.start(Some(Uuid::new_v4()), "gmail", MODE_FULL)
            .await
            .unwrap();

        let (page, next) = repo
            .list_for_user(user_id, &RunFilter::default(), 2, None)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        let next = decode_cursor(&next.unwrap()).unwrap();

        let (rest, end) = repo
            .list_for_user(user_id, &RunFilter::default(), 2, Some(&next))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert!(end.is_none());

        let gmail_only = RunFilter {
            source: Some("gmail".into()),
            status: None,
        };
        let (gmail, _) = repo.list_for_user(user_id, &gmail_only, 10, None).await.unwrap();
        assert_eq!(gmail.len(), 2);
    }
}
