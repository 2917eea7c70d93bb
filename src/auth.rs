//! # Authentication
//!
//! Two guards protect the API:
//! * user routes: operator bearer token plus the `X-User-Id` identity header;
//! * cron routes: bearer secret equal to `CRON_SECRET` or `INTERNAL_API_TOKEN`.
//!
//! All secret comparisons are constant time.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::IntoParams;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, validation_error};
use crate::server::AppState;

/// Header carrying the caller's external identity
pub const USER_ID_HEADER: &str = "X-User-Id";

const MAX_USER_ID_LEN: usize = 255;

/// Authenticated caller identity (the external id users are keyed by)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity(pub String);

/// Marker inserted by the cron guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronAuth;

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Validates the operator bearer token and the `X-User-Id` header.
pub async fn user_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    if !matches_any(token, config.operator_tokens.iter().map(String::as_str)) {
        return Err(unauthorized(Some("Invalid bearer token")));
    }

    let identity = extract_user_id(request.headers())?;
    tracing::debug!(user = %identity.0, "Authenticated user request");

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Validates the cron bearer secret. An unconfigured secret never matches.
pub async fn cron_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let secrets = config
        .cron_secret
        .iter()
        .chain(config.internal_api_token.iter())
        .map(String::as_str)
        .filter(|s| !s.is_empty());

    if !matches_any(token, secrets) {
        tracing::warn!("Rejected cron request with invalid secret");
        return Err(unauthorized(Some("Invalid cron secret")));
    }

    request.extensions_mut().insert(CronAuth);
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn matches_any<'a>(token: &str, candidates: impl IntoIterator<Item = &'a str>) -> bool {
    // Evaluate every candidate so timing does not reveal which one matched
    candidates.into_iter().fold(false, |found, candidate| {
        let eq: bool = token.as_bytes().ct_eq(candidate.as_bytes()).into();
        found | eq
    })
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserIdentity, ApiError> {
    let value = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| {
            validation_error(
                "Missing required header",
                serde_json::json!({ USER_ID_HEADER: "Required header is missing" }),
            )
        })?
        .to_str()
        .map_err(|_| {
            validation_error(
                "Invalid user header",
                serde_json::json!({ USER_ID_HEADER: "Header must be valid UTF-8" }),
            )
        })?
        .trim();

    if value.is_empty() || value.len() > MAX_USER_ID_LEN {
        return Err(validation_error(
            "Invalid user id",
            serde_json::json!({ USER_ID_HEADER: "Must be 1 to 255 characters" }),
        ));
    }

    Ok(UserIdentity(value.to_string()))
}

/// OpenAPI header parameter for `X-User-Id`
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct UserHeader {
    /// External identity of the calling user
    #[serde(rename = "X-User-Id")]
    #[param(rename = "X-User-Id", value_type = String)]
    pub user_id: String,
}

impl<S> FromRequestParts<S> for UserIdentity
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserIdentity>()
            .cloned()
            .ok_or_else(|| unauthorized(Some("User authentication required")))
    }
}

impl<S> FromRequestParts<S> for CronAuth
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CronAuth>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Cron authentication required")))
    }
}
