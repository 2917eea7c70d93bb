//! # Sync Run History Handler

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{UserHeader, UserIdentity};
use crate::cursor::decode_cursor;
use crate::error::ApiError;
use crate::models::sync_run;
use crate::repositories::sync_run::RunFilter;
use crate::server::AppState;

/// Query parameters for sync run listing
#[derive(Debug, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct ListSyncRunsQuery {
    /// Source filter, e.g. "gmail" or "hubspot_companies"
    pub source: Option<String>,
    /// running, succeeded or failed
    pub status: Option<String>,
    /// Maximum number of runs to return (default: 50, max: 100)
    pub limit: Option<i64>,
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunInfo {
    pub id: Uuid,
    pub source: String,
    #[schema(example = "full")]
    pub mode: String,
    #[schema(example = "succeeded")]
    pub status: String,
    pub records_fetched: i64,
    pub records_saved: i64,
    pub records_skipped: i64,
    pub chunks: i32,
    pub errors: Option<serde_json::Value>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl From<sync_run::Model> for SyncRunInfo {
    fn from(model: sync_run::Model) -> Self {
        Self {
            id: model.id,
            source: model.source,
            mode: model.mode,
            status: model.status,
            records_fetched: model.records_fetched,
            records_saved: model.records_saved,
            records_skipped: model.records_skipped,
            chunks: model.chunks,
            errors: model.errors,
            started_at: model.started_at.to_rfc3339(),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunsResponse {
    pub runs: Vec<SyncRunInfo>,
    pub next_cursor: Option<String>,
}

/// The caller's sync runs, newest first
#[utoipa::path(
    get,
    path = "/api/sync-runs",
    security(("bearer_auth" = [])),
    params(UserHeader, ListSyncRunsQuery),
    responses(
        (status = 200, description = "A page of sync runs", body = SyncRunsResponse),
        (status = 400, description = "Invalid limit or cursor", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_sync_runs(
    State(state): State<AppState>,
    identity: UserIdentity,
    Query(query): Query<ListSyncRunsQuery>,
) -> Result<Json<SyncRunsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(50);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "limit must be between 1 and 100",
        ));
    }
    let cursor = query.cursor.as_deref().map(decode_cursor).transpose()?;

    let user = state.resolve_user(&identity).await?;
    let filter = RunFilter {
        source: query.source,
        status: query.status,
    };
    let (runs, next_cursor) = state
        .sync_runs()
        .list_for_user(user.id, &filter, limit as u64, cursor.as_ref())
        .await?;

    Ok(Json(SyncRunsResponse {
        runs: runs.into_iter().map(Into::into).collect(),
        next_cursor,
    }))
}
