//! # Cron Handlers
//!
//! Entry points for scheduled jobs. Every route sits behind the cron secret guard.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::CronAuth;
use crate::embedding_executor::{BatchResult, CleanupResult};
use crate::error::ApiError;
use crate::repositories::embedding_queue::QueueStats;
use crate::server::AppState;
use crate::sync::orchestrator::OrchestratorReport;

const MAX_BATCH_SIZE: u64 = 500;

#[derive(Debug, Deserialize, Serialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEmbeddingsQuery {
    /// Items to process in this run (default from EMBEDDING_CRON_BATCH_SIZE)
    pub batch_size: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQueueQuery {
    /// Age in days of finished items to delete (default from EMBEDDING_CLEANUP_DAYS)
    pub days_old: Option<i64>,
}

/// Process a batch of pending embedding items
#[utoipa::path(
    post,
    path = "/api/cron/process-embeddings",
    security(("bearer_auth" = [])),
    params(ProcessEmbeddingsQuery),
    responses(
        (status = 200, description = "Batch finished", body = BatchResult),
        (status = 400, description = "Invalid batch size", body = ApiError),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    tag = "cron"
)]
pub async fn process_embeddings(
    State(state): State<AppState>,
    _cron: CronAuth,
    Query(query): Query<ProcessEmbeddingsQuery>,
) -> Result<Json<BatchResult>, ApiError> {
    let batch_size = query
        .batch_size
        .unwrap_or(state.config.embedding.cron_batch_size);
    if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED".to_string(),
            format!("batchSize must be between 1 and {MAX_BATCH_SIZE}"),
        ));
    }

    let result = state.embedding_executor().process_batch(batch_size).await?;
    tracing::info!(
        processed = result.processed,
        failed = result.failed,
        skipped = result.skipped,
        "Cron embedding batch finished"
    );
    Ok(Json(result))
}

/// Queue counts per status
#[utoipa::path(
    get,
    path = "/api/cron/process-embeddings",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Queue statistics", body = QueueStats),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    tag = "cron"
)]
pub async fn embedding_stats(
    State(state): State<AppState>,
    _cron: CronAuth,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.embedding_executor().stats().await?))
}

/// Delete old finished queue items and requeue stale claims
#[utoipa::path(
    post,
    path = "/api/cron/cleanup-queue",
    security(("bearer_auth" = [])),
    params(CleanupQueueQuery),
    responses(
        (status = 200, description = "Cleanup finished", body = CleanupResult),
        (status = 400, description = "Invalid age", body = ApiError),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    tag = "cron"
)]
pub async fn cleanup_queue(
    State(state): State<AppState>,
    _cron: CronAuth,
    Query(query): Query<CleanupQueueQuery>,
) -> Result<Json<CleanupResult>, ApiError> {
    let days_old = query.days_old.unwrap_or(state.config.embedding.cleanup_days);
    if days_old < 1 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "daysOld must be at least 1",
        ));
    }

    let result = state
        .embedding_executor()
        .cleanup(days_old, state.config.embedding.stale_minutes)
        .await?;
    Ok(Json(result))
}

/// Incremental Gmail and Calendar sync for every active user
#[utoipa::path(
    post,
    path = "/api/cron/sync-incremental",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Per-user outcome", body = OrchestratorReport),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    tag = "cron"
)]
pub async fn sync_incremental(
    State(state): State<AppState>,
    _cron: CronAuth,
) -> Result<Json<OrchestratorReport>, ApiError> {
    let report = state.orchestrator().run().await?;
    Ok(Json(report))
}
