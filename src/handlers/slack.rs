//! # Slack Handlers
//!
//! Channel import, message posting, and the signed Events API webhook.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::auth::{UserHeader, UserIdentity};
use crate::error::{ApiError, validation_error};
use crate::handlers::integrations::stored_access_token;
use crate::repositories::integration::PLATFORM_SLACK;
use crate::server::AppState;
use crate::sync::conversation::PLATFORM_SLACK as SLACK_PLATFORM_TYPE;
use crate::sync::periskope::ImportResult;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportChannelRequest {
    #[schema(example = "C0123456789")]
    pub channel_id: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PostMessageRequest {
    pub channel: String,
    pub text: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PostMessageResponse {
    pub ok: bool,
    pub channel: String,
    pub ts: String,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(validation_error(
            "Invalid request",
            json!({ field: "Must not be empty" }),
        ));
    }
    Ok(())
}

/// Import a channel's history into `messages`
#[utoipa::path(
    post,
    path = "/api/slack/import",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = ImportChannelRequest,
    responses(
        (status = 200, description = "Import finished", body = ImportResult),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 503, description = "No Slack token available", body = ApiError)
    ),
    tag = "messaging"
)]
pub async fn import_channel(
    State(state): State<AppState>,
    identity: UserIdentity,
    payload: Result<Json<ImportChannelRequest>, JsonRejection>,
) -> Result<Json<ImportResult>, ApiError> {
    let Json(request) = payload?;
    require_non_empty("channelId", &request.channel_id)?;

    let user = state.resolve_user(&identity).await?;
    let token = stored_access_token(&state, user.id, PLATFORM_SLACK).await?;
    let conversation = state
        .messages()
        .get_or_create_conversation(
            user.id,
            SLACK_PLATFORM_TYPE,
            request.channel_id.trim(),
            request.title.as_deref(),
        )
        .await?;

    let result = state
        .slack_import()
        .import(user.id, &conversation, token)
        .await?;
    Ok(Json(result))
}

/// Post a message with `chat.postMessage`
#[utoipa::path(
    post,
    path = "/api/slack/messages",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = PostMessageRequest,
    responses(
        (status = 200, description = "Message posted", body = PostMessageResponse),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 502, description = "Slack rejected the message", body = ApiError)
    ),
    tag = "messaging"
)]
pub async fn post_message(
    State(state): State<AppState>,
    identity: UserIdentity,
    payload: Result<Json<PostMessageRequest>, JsonRejection>,
) -> Result<Json<PostMessageResponse>, ApiError> {
    let Json(request) = payload?;
    require_non_empty("channel", &request.channel)?;
    require_non_empty("text", &request.text)?;

    let user = state.resolve_user(&identity).await?;
    let token = stored_access_token(&state, user.id, PLATFORM_SLACK).await?;
    let posted = state
        .clients
        .slack
        .post_message(token.as_deref(), &request.channel, &request.text)
        .await?;

    Ok(Json(PostMessageResponse {
        ok: true,
        channel: posted.channel,
        ts: posted.ts,
    }))
}

/// Slack Events API receiver
///
/// Requests are signature-checked before reaching this handler.
#[utoipa::path(
    post,
    path = "/api/webhooks/slack",
    request_body = Object,
    responses(
        (status = 200, description = "Event accepted, or the url_verification challenge echoed"),
        (status = 401, description = "Signature missing, stale or invalid")
    ),
    tag = "messaging"
)]
pub async fn slack_events(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) = payload?;
    match payload.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = payload.get("challenge").cloned().unwrap_or(Value::Null);
            Ok(Json(json!({ "challenge": challenge })))
        }
        Some("event_callback") => {
            fn field(value: Option<&Value>) -> &str {
                value.and_then(Value::as_str).unwrap_or("")
            }
            let event = payload.get("event");
            let team_id = field(payload.get("team_id"));
            let event_type = field(event.and_then(|e| e.get("type")));
            let channel = field(event.and_then(|e| e.get("channel")));
            info!(team_id, event_type, channel, "Slack event received");
            Ok(Json(json!({ "ok": true })))
        }
        other => {
            debug!(kind = ?other, "Ignoring Slack payload");
            Ok(Json(json!({ "ok": true })))
        }
    }
}
