//! # User Integration Handlers
//!
//! Stores provider tokens (encrypted at rest) and lists connected platforms without secrets.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{UserHeader, UserIdentity};
use crate::error::{ApiError, validation_error};
use crate::models::user_integration;
use crate::repositories::integration::{PLATFORMS, is_known_platform};
use crate::server::AppState;

/// Integration as exposed over the API
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationInfo {
    pub id: Uuid,
    #[schema(example = "gmail")]
    pub platform: String,
    pub is_active: bool,
    pub has_refresh_token: bool,
    pub token_expires_at: Option<String>,
    pub last_sync_at: Option<String>,
    pub metadata: Option<Value>,
}

impl From<user_integration::Model> for IntegrationInfo {
    fn from(model: user_integration::Model) -> Self {
        Self {
            id: model.id,
            platform: model.platform,
            is_active: model.is_active,
            has_refresh_token: model.refresh_token_ciphertext.is_some(),
            token_expires_at: model.token_expires_at.map(|dt| dt.to_rfc3339()),
            last_sync_at: model.last_sync_at.map(|dt| dt.to_rfc3339()),
            metadata: model.metadata,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpsertIntegrationRequest {
    pub access_token: String,
    /// Omit to keep the stored refresh token
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

/// Decrypted access token of the user's active integration, if any.
pub(crate) async fn stored_access_token(
    state: &AppState,
    user_id: Uuid,
    platform: &str,
) -> Result<Option<String>, ApiError> {
    let integrations = state.integrations();
    let Some(integration) = integrations.find_active(user_id, platform).await? else {
        return Ok(None);
    };
    Ok(integrations.decrypt_tokens(&integration)?.access_token)
}

/// List the caller's integrations
#[utoipa::path(
    get,
    path = "/api/integrations",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Integrations without secrets", body = [IntegrationInfo]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    identity: UserIdentity,
) -> Result<Json<Vec<IntegrationInfo>>, ApiError> {
    let user = state.resolve_user(&identity).await?;
    let integrations = state.integrations().list_for_user(user.id).await?;
    Ok(Json(integrations.into_iter().map(Into::into).collect()))
}

/// Store tokens for a platform and mark the integration active
#[utoipa::path(
    put,
    path = "/api/integrations/{platform}",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("platform" = String, Path, description = "gmail, google_calendar, hubspot, slack or periskope")
    ),
    request_body = UpsertIntegrationRequest,
    responses(
        (status = 200, description = "Integration stored", body = IntegrationInfo),
        (status = 400, description = "Unknown platform or invalid body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn upsert_integration(
    State(state): State<AppState>,
    identity: UserIdentity,
    Path(platform): Path<String>,
    payload: Result<Json<UpsertIntegrationRequest>, JsonRejection>,
) -> Result<Json<IntegrationInfo>, ApiError> {
    let Json(request) = payload?;
    if !is_known_platform(&platform) {
        return Err(validation_error(
            "Unknown platform",
            json!({ "platform": format!("Must be one of: {}", PLATFORMS.join(", ")) }),
        ));
    }
    if request.access_token.trim().is_empty() {
        return Err(validation_error(
            "Invalid request",
            json!({ "accessToken": "Must not be empty" }),
        ));
    }
    if let Some(metadata) = &request.metadata
        && !metadata.is_object()
    {
        return Err(validation_error(
            "Invalid request",
            json!({ "metadata": "Must be a JSON object" }),
        ));
    }

    let user = state.resolve_user(&identity).await?;
    let integration = state
        .integrations()
        .upsert_tokens(
            user.id,
            &platform,
            &request.access_token,
            request.refresh_token.as_deref(),
            request.token_expires_at.map(|dt| dt.fixed_offset()),
            request.metadata,
        )
        .await?;

    tracing::info!(user_id = %user.id, platform = %platform, "Integration tokens stored");
    Ok(Json(integration.into()))
}
