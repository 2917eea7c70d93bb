//! # Solution Handbook Handlers

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{UserHeader, UserIdentity};
use crate::error::{ApiError, not_found};
use crate::models::solution_handbook;
use crate::server::AppState;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HandbookInfo {
    pub id: Uuid,
    pub title: String,
    pub prompt: Option<String>,
    pub html_content: Option<String>,
    pub is_published: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<solution_handbook::Model> for HandbookInfo {
    fn from(model: solution_handbook::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            prompt: model.prompt,
            html_content: model.html_content,
            is_published: model.is_published,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// The caller's handbooks, newest first
#[utoipa::path(
    get,
    path = "/api/solution-handbooks",
    security(("bearer_auth" = [])),
    params(UserHeader),
    responses(
        (status = 200, description = "Handbooks", body = [HandbookInfo]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_handbooks(
    State(state): State<AppState>,
    identity: UserIdentity,
) -> Result<Json<Vec<HandbookInfo>>, ApiError> {
    let user = state.resolve_user(&identity).await?;
    let handbooks = state.handbooks().list_for_user(user.id).await?;
    Ok(Json(handbooks.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/solution-handbooks/{id}",
    security(("bearer_auth" = [])),
    params(
        UserHeader,
        ("id" = Uuid, Path, description = "Handbook id")
    ),
    responses(
        (status = 200, description = "Handbook", body = HandbookInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Not found or not owned by the caller", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn get_handbook(
    State(state): State<AppState>,
    identity: UserIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<HandbookInfo>, ApiError> {
    let user = state.resolve_user(&identity).await?;
    state
        .handbooks()
        .find_for_user(user.id, id)
        .await?
        .map(|h| Json(h.into()))
        .ok_or_else(|| not_found("Handbook not found"))
}
