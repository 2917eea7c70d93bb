//! # Full Resync Handlers
//!
//! "Nuclear" Gmail and Calendar syncs that ignore stored watermarks.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::{UserHeader, UserIdentity};
use crate::error::ApiError;
use crate::repositories::integration::{PLATFORM_GMAIL, PLATFORM_GOOGLE_CALENDAR};
use crate::server::AppState;
use crate::sync::calendar::CalendarSyncReport;
use crate::sync::gmail::GmailSyncReport;

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NuclearSyncRequest {
    /// Queue synced rows for embedding
    #[serde(default)]
    pub enable_embeddings: bool,
}

/// Refetch the caller's whole mailbox
#[utoipa::path(
    post,
    path = "/api/nuclear-gmail-sync",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = NuclearSyncRequest,
    responses(
        (status = 200, description = "Sync finished; per-chunk errors are listed in the outcome", body = GmailSyncReport),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Gmail is not connected", body = ApiError),
        (status = 502, description = "Google request failed", body = ApiError)
    ),
    tag = "google"
)]
pub async fn nuclear_gmail_sync(
    State(state): State<AppState>,
    identity: UserIdentity,
    payload: Result<Json<NuclearSyncRequest>, JsonRejection>,
) -> Result<Json<GmailSyncReport>, ApiError> {
    let Json(request) = payload?;
    let user = state.resolve_user(&identity).await?;
    let token = state
        .token_refresher()
        .access_token(user.id, PLATFORM_GMAIL)
        .await?;

    let report = state
        .gmail_sync()
        .nuclear(user.id, &token, request.enable_embeddings)
        .await?;
    Ok(Json(report))
}

/// Refetch every event of every calendar
#[utoipa::path(
    post,
    path = "/api/nuclear-calendar-sync",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = NuclearSyncRequest,
    responses(
        (status = 200, description = "Sync finished; failed calendars carry their error", body = CalendarSyncReport),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Google Calendar is not connected", body = ApiError),
        (status = 502, description = "Google request failed", body = ApiError)
    ),
    tag = "google"
)]
pub async fn nuclear_calendar_sync(
    State(state): State<AppState>,
    identity: UserIdentity,
    payload: Result<Json<NuclearSyncRequest>, JsonRejection>,
) -> Result<Json<CalendarSyncReport>, ApiError> {
    let Json(request) = payload?;
    let user = state.resolve_user(&identity).await?;
    let token = state
        .token_refresher()
        .access_token(user.id, PLATFORM_GOOGLE_CALENDAR)
        .await?;

    let report = state
        .calendar_sync()
        .nuclear(user.id, &token, request.enable_embeddings)
        .await?;
    Ok(Json(report))
}
