//! # Error Handling
//!
//! Every handler failure is rendered as `application/problem+json` carrying a stable code and
//! the request's trace id.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::connectors::ProviderError;
use crate::sync::SyncError;
use crate::token_refresh::TokenError;
use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                // Fallback: generate a correlation ID for basic client-server log correlation
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE
            || SQLITE_DUPLICATE_CODES.contains(&code_str)
        {
            return true;
        }

    }

    false
}

/// Upstream failure details attached to `PROVIDER_ERROR` responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderErrorDetails {
    /// Provider identifier (e.g., "hubspot", "gmail")
    pub provider: String,
    /// HTTP status code from upstream
    pub status: u16,
    /// Response body snippet from upstream (truncated for security)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        // Add Retry-After header if present
        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        // Log the full error for debugging
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Query(query_err) => {
                tracing::error!("Database query error: {:?}", query_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
            sea_orm::DbErr::Exec(exec_err) => {
                tracing::error!("Database execution error: {:?}", exec_err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(error: ProviderError) -> Self {
        let provider = error.provider();
        match error {
            ProviderError::RateLimited {
                retry_after_secs, ..
            } => {
                tracing::warn!(provider, retry_after_secs, "Provider rate limited request");
                Self::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    &format!("{} rate limit exceeded", provider),
                )
                .with_retry_after(retry_after_secs)
            }
            ProviderError::NotConfigured { message, .. } => {
                tracing::warn!(provider, %message, "Provider not configured");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    &format!("{} is not configured: {}", provider, message),
                )
            }
            ProviderError::Network { message, .. } | ProviderError::Decode { message, .. } => {
                tracing::error!(provider, %message, "Provider call failed");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_ERROR",
                    &format!("Provider {} call failed", provider),
                )
                .with_details(json!({ "provider": provider, "reason": message }))
            }
            other => {
                let status = other.upstream_status().unwrap_or(502);
                let body = match other {
                    ProviderError::Http { body, .. }
                    | ProviderError::NotFound { message: body, .. }
                    | ProviderError::Gone { message: body, .. }
                    | ProviderError::Unauthorized { message: body, .. } => Some(body),
                    _ => None,
                };
                tracing::error!(provider, status, "Provider returned error status");
                provider_error(provider.to_string(), status, body)
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::Provider(e) => e.into(),
            SyncError::Database(e) => e.into(),
            SyncError::Token(e) => e.into(),
            SyncError::Other(e) => e.into(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::NotConnected { .. } | TokenError::MissingAccessToken { .. } => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT", &error.to_string())
            }
            TokenError::Provider(e) => e.into(),
            TokenError::Storage(e) => e.into(),
        }
    }
}

/// Create a not found error (404)
pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// Create a bad request error (400) without field details
pub fn bad_request(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}

/// Create a provider upstream error
pub fn provider_error(provider: String, status: u16, body: Option<String>) -> ApiError {
    let provider_error = ProviderErrorDetails {
        provider: provider.clone(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    // Upstream HTTP failures are always 502, whatever status the provider sent
    let api_status = StatusCode::BAD_GATEWAY;
    let api_code = "PROVIDER_ERROR";

    ApiError::new(
        api_status,
        api_code,
        &format!("Provider {} returned error status {}", provider, status),
    )
    .with_details(json!(provider_error))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn api_error_carries_details_and_retry_after() {
        let error = ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "slow down")
            .with_details(json!({"field": "value"}))
            .with_retry_after(60);

        assert_eq!(error.code, Box::from("RATE_LIMITED"));
        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
        assert_eq!(error.retry_after, Some(60));
    }

    #[test]
    fn anyhow_errors_are_opaque_500s() {
        let api_error: ApiError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn response_is_problem_json_with_retry_after() {
        let response = ApiError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "slow down")
            .with_retry_after(30)
            .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "30");
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn trace_id_falls_back_to_correlation_id() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "bad");
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[tokio::test]
    async fn trace_id_comes_from_request_context() {
        let ctx = telemetry::TraceContext::new("req-123".to_string());
        let error = telemetry::with_trace_context(ctx, async {
            ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "bad")
        })
        .await;
        assert_eq!(error.trace_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn provider_error_is_always_502_with_details() {
        for upstream in [200u16, 400, 401, 429, 503] {
            let error = provider_error(
                "hubspot".to_string(),
                upstream,
                Some("upstream said no".to_string()),
            );
            assert_eq!(error.status, StatusCode::BAD_GATEWAY);
            assert_eq!(error.code, Box::from("PROVIDER_ERROR"));
            let details = error.details.unwrap();
            assert_eq!(details["provider"], "hubspot");
            assert_eq!(details["status"], upstream);
        }
    }

    #[test]
    fn provider_error_truncates_on_char_boundaries() {
        let body = "\u{1F680} rocket body ".repeat(40);
        let error = provider_error("gmail".to_string(), 500, Some(body));
        let details = error.details.unwrap();
        let snippet = details["body_snippet"].as_str().unwrap();
        assert!(snippet.ends_with("..."));
        assert!(snippet.chars().count() <= 203);
    }

    #[test]
    fn classified_provider_errors_map_to_api_errors() {
        let rate_limited: ApiError = ProviderError::RateLimited {
            provider: "gmail",
            retry_after_secs: 120,
        }
        .into();
        assert_eq!(rate_limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rate_limited.retry_after, Some(120));

        let unconfigured: ApiError =
            ProviderError::not_configured("periskope", "api key missing").into();
        assert_eq!(unconfigured.status, StatusCode::SERVICE_UNAVAILABLE);

        let http: ApiError = ProviderError::Http {
            provider: "hubspot",
            status: 500,
            body: "boom".to_string(),
        }
        .into();
        assert_eq!(http.status, StatusCode::BAD_GATEWAY);
        assert_eq!(http.details.unwrap()["status"], 500);

        let unauthorized: ApiError = ProviderError::Unauthorized {
            provider: "slack",
            message: "invalid_auth".to_string(),
        }
        .into();
        assert_eq!(unauthorized.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn database_not_found_maps_to_404() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("emails".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("emails"));
    }

    #[test]
    fn helper_constructors() {
        assert_eq!(unauthorized(None).message, Box::from("Authentication required"));
        assert_eq!(not_found("missing").status, StatusCode::NOT_FOUND);
        assert_eq!(bad_request("nope").code, Box::from("VALIDATION_FAILED"));

        let err = validation_error("Validation failed", json!({"channel": "required"}));
        assert_eq!(err.details, Some(Box::new(json!({"channel": "required"}))));
    }
}
