//! # Flight-Credit Summary Handler

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde_json::json;

use crate::auth::{UserHeader, UserIdentity};
use crate::error::{ApiError, bad_request};
use crate::partner_billing::{FcSummary, summarize};
use crate::server::AppState;

/// Credit totals for a partner organisation
#[utoipa::path(
    get,
    path = "/api/fc-summary/{partner_org_id}",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("partner_org_id" = String, Path, description = "Partner organisation id")
    ),
    responses(
        (status = 200, description = "Credit summary", body = FcSummary, example = json!({
            "fcRemaining": 1125.0,
            "fcBought": 1500.0,
            "fcConsumed": 375.0,
            "fcConsumedMTD": 50.0,
            "fcConsumedYTD": 250.0
        })),
        (status = 400, description = "Missing partner id", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Ledger query failed", body = ApiError)
    ),
    tag = "billing"
)]
pub async fn get_fc_summary(
    State(state): State<AppState>,
    _identity: UserIdentity,
    Path(partner_org_id): Path<String>,
) -> Result<Json<FcSummary>, ApiError> {
    let partner_org_id = partner_org_id.trim();
    if partner_org_id.is_empty() {
        return Err(bad_request("Missing partner_org_id"));
    }

    let transactions = state
        .ledger
        .transactions(partner_org_id)
        .await
        .map_err(|e| {
            tracing::error!(partner_org_id, error = %e, "Failed to load partner transactions");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "Failed to fetch transactions",
            )
            .with_details(json!({ "reason": e.to_string() }))
        })?;

    Ok(Json(summarize(&transactions, Utc::now())))
}
