//! # HubSpot API Handlers
//!
//! Company/contact/deal sync, association linking, and deal engagements.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};

use crate::auth::{UserHeader, UserIdentity};
use crate::connectors::ProviderError;
use crate::error::{ApiError, not_found};
use crate::repositories::crm::CrmCounts;
use crate::server::AppState;
use crate::sync::associations::LinkStats;
use crate::sync::hubspot::{EngagementSyncResult, HubSpotSyncRequest, HubSpotSyncStats};

fn require_token(state: &AppState) -> Result<(), ApiError> {
    if state.config.providers.hubspot_access_token.is_none() {
        return Err(
            ProviderError::not_configured("hubspot", "HUBSPOT_ACCESS_TOKEN is not set").into(),
        );
    }
    Ok(())
}

/// Sync companies, contacts and deals, then link associations
///
/// Phase failures are reported in `errors`; later phases still run.
#[utoipa::path(
    post,
    path = "/api/hubspot/sync",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = HubSpotSyncRequest,
    responses(
        (status = 200, description = "Sync finished (possibly with phase errors)", body = HubSpotSyncStats),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 503, description = "HubSpot is not configured", body = ApiError)
    ),
    tag = "hubspot"
)]
pub async fn sync_hubspot(
    State(state): State<AppState>,
    identity: UserIdentity,
    payload: Result<Json<HubSpotSyncRequest>, JsonRejection>,
) -> Result<Json<HubSpotSyncStats>, ApiError> {
    let Json(request) = payload?;
    require_token(&state)?;
    let user = state.resolve_user(&identity).await?;

    let stats = state.hubspot_sync().run(user.id, &request).await;
    Ok(Json(stats))
}

/// Local row counts for companies, contacts and deals
#[utoipa::path(
    get,
    path = "/api/hubspot/sync",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Row counts", body = CrmCounts),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "hubspot"
)]
pub async fn hubspot_counts(
    State(state): State<AppState>,
    _identity: UserIdentity,
) -> Result<Json<CrmCounts>, ApiError> {
    Ok(Json(state.crm().counts().await?))
}

/// Fill in missing company links for contacts and deals
#[utoipa::path(
    post,
    path = "/api/hubspot/link-associations",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Linking finished", body = LinkStats),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 502, description = "HubSpot request failed", body = ApiError),
        (status = 503, description = "HubSpot is not configured", body = ApiError)
    ),
    tag = "hubspot"
)]
pub async fn link_associations(
    State(state): State<AppState>,
    _identity: UserIdentity,
) -> Result<Json<LinkStats>, ApiError> {
    require_token(&state)?;
    let stats = state.hubspot_sync().linker().link_associations().await?;
    Ok(Json(stats))
}

/// Pull a synced deal's notes into `deal_engagements`
#[utoipa::path(
    post,
    path = "/api/hubspot/deals/{hubspot_deal_id}/engagements",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("hubspot_deal_id" = String, Path, description = "HubSpot deal id")
    ),
    responses(
        (status = 200, description = "Engagements synced", body = EngagementSyncResult),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Deal has not been synced", body = ApiError),
        (status = 502, description = "HubSpot request failed", body = ApiError)
    ),
    tag = "hubspot"
)]
pub async fn sync_deal_engagements(
    State(state): State<AppState>,
    _identity: UserIdentity,
    Path(hubspot_deal_id): Path<String>,
) -> Result<Json<EngagementSyncResult>, ApiError> {
    require_token(&state)?;
    state
        .hubspot_sync()
        .sync_deal_engagements(&hubspot_deal_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&format!("Deal '{}' has not been synced", hubspot_deal_id)))
}
