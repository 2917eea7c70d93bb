//! # WhatsApp Import Handler

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{UserHeader, UserIdentity};
use crate::connectors::ProviderError;
use crate::error::{ApiError, not_found, validation_error};
use crate::handlers::integrations::stored_access_token;
use crate::repositories::integration::PLATFORM_PERISKOPE;
use crate::server::AppState;
use crate::sync::conversation::PLATFORM_WHATSAPP;
use crate::sync::periskope::ImportResult;

fn default_platform_type() -> String {
    PLATFORM_WHATSAPP.to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportMessagesRequest {
    /// Existing conversation to import into; created from the chat id when omitted
    pub conversation_id: Option<Uuid>,
    #[schema(example = "120363025246125888@g.us")]
    pub periskope_chat_id: String,
    #[serde(default = "default_platform_type")]
    pub platform_type: String,
    pub title: Option<String>,
}

/// Import a WhatsApp chat's history through Periskope
///
/// The API key comes from configuration, or from the caller's `periskope` integration.
#[utoipa::path(
    post,
    path = "/api/periskope/import-messages",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = ImportMessagesRequest,
    responses(
        (status = 200, description = "Import finished", body = ImportResult),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Conversation not found", body = ApiError),
        (status = 503, description = "No Periskope API key available", body = ApiError)
    ),
    tag = "messaging"
)]
pub async fn import_messages(
    State(state): State<AppState>,
    identity: UserIdentity,
    payload: Result<Json<ImportMessagesRequest>, JsonRejection>,
) -> Result<Json<ImportResult>, ApiError> {
    let Json(request) = payload?;
    let chat_id = request.periskope_chat_id.trim();
    if chat_id.is_empty() {
        return Err(validation_error(
            "Invalid request",
            json!({ "periskopeChatId": "Must not be empty" }),
        ));
    }

    let user = state.resolve_user(&identity).await?;
    let api_key = match state.config.providers.periskope_api_key.clone() {
        Some(key) => key,
        None => stored_access_token(&state, user.id, PLATFORM_PERISKOPE)
            .await?
            .ok_or_else(|| {
                ProviderError::not_configured("periskope", "No Periskope API key available")
            })?,
    };

    let messages = state.messages();
    let conversation = match request.conversation_id {
        Some(id) => messages
            .find_conversation(user.id, id)
            .await?
            .ok_or_else(|| not_found(&format!("Conversation '{}' not found", id)))?,
        None => {
            messages
                .get_or_create_conversation(
                    user.id,
                    &request.platform_type,
                    chat_id,
                    request.title.as_deref(),
                )
                .await?
        }
    };

    let result = state
        .periskope_import()
        .import(user.id, &conversation, &api_key)
        .await?;
    Ok(Json(result))
}
