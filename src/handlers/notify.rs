//! # n8n Forwarding Handler

use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use utoipa::ToSchema;

use crate::auth::{UserHeader, UserIdentity};
use crate::connectors::ProviderError;
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookForwarded {
    pub success: bool,
}

/// Forward the request body to the configured n8n webhook
///
/// A non-2xx answer from n8n is relayed with the same status.
#[utoipa::path(
    post,
    path = "/api/send-webhook",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = Object,
    responses(
        (status = 200, description = "Forwarded", body = WebhookForwarded),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 503, description = "N8N_WEBHOOK_URL is not set", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn send_webhook(
    State(state): State<AppState>,
    _identity: UserIdentity,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    match state.clients.n8n.forward(&payload).await {
        Ok(()) => Ok(Json(WebhookForwarded { success: true }).into_response()),
        Err(ProviderError::Http { status, body, .. }) => {
            tracing::warn!(status, "n8n webhook rejected the payload");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let error = if body.is_empty() {
                "Webhook request failed".to_string()
            } else {
                body
            };
            Ok((status, Json(json!({ "error": error }))).into_response())
        }
        Err(e) => Err(e.into()),
    }
}
