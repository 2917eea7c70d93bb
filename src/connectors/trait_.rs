//! Shared provider plumbing
//!
//! Upstream error classification and the HTTP client settings every provider client uses.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default Retry-After for rate limits that do not carry the header
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Google 403 bodies that signal quota exhaustion rather than a permission problem
const QUOTA_ERROR_PATTERNS: [&str; 6] = [
    "userratelimitexceeded",
    "ratelimitexceeded",
    "quotaexceeded",
    "servicelimit",
    "daily limit",
    "billing limit",
];

/// Classified upstream failure
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: credentials rejected: {message}")]
    Unauthorized {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        provider: &'static str,
        retry_after_secs: u64,
    },

    #[error("{provider}: not found: {message}")]
    NotFound {
        provider: &'static str,
        message: String,
    },

    /// HTTP 410; for Calendar this means the sync token expired
    #[error("{provider}: resource gone: {message}")]
    Gone {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: upstream returned {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider}: network error: {message}")]
    Network {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: unexpected response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error("{provider}: not configured: {message}")]
    NotConfigured {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized { provider, .. }
            | ProviderError::RateLimited { provider, .. }
            | ProviderError::NotFound { provider, .. }
            | ProviderError::Gone { provider, .. }
            | ProviderError::Http { provider, .. }
            | ProviderError::Network { provider, .. }
            | ProviderError::Decode { provider, .. }
            | ProviderError::NotConfigured { provider, .. } => provider,
        }
    }

    pub fn not_configured<S: Into<String>>(provider: &'static str, message: S) -> Self {
        ProviderError::NotConfigured {
            provider,
            message: message.into(),
        }
    }

    pub fn network(provider: &'static str, error: reqwest::Error) -> Self {
        ProviderError::Network {
            provider,
            message: error.to_string(),
        }
    }

    pub fn decode<E: std::fmt::Display>(provider: &'static str, error: E) -> Self {
        ProviderError::Decode {
            provider,
            message: error.to_string(),
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, ProviderError::Gone { .. })
    }

    /// Upstream HTTP status, when there was one
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ProviderError::Unauthorized { .. } => Some(401),
            ProviderError::RateLimited { .. } => Some(429),
            ProviderError::NotFound { .. } => Some(404),
            ProviderError::Gone { .. } => Some(410),
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Builds the reqwest client shared by a provider client.
pub fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

fn retry_after_header(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Passes successful responses through and classifies everything else.
pub async fn check_response(
    provider: &'static str,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after_header(&response);
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(provider, status, retry_after, body))
}

/// Maps an upstream status (plus body and Retry-After) to a [`ProviderError`].
pub fn classify_status(
    provider: &'static str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: String,
) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            provider,
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        StatusCode::FORBIDDEN if is_quota_error(&body) => ProviderError::RateLimited {
            provider,
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        StatusCode::UNAUTHORIZED => ProviderError::Unauthorized {
            provider,
            message: "invalid or expired access token".to_string(),
        },
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            provider,
            message: body,
        },
        StatusCode::GONE => ProviderError::Gone {
            provider,
            message: body,
        },
        other => ProviderError::Http {
            provider,
            status: other.as_u16(),
            body,
        },
    }
}

fn is_quota_error(body: &str) -> bool {
    let lower = body.to_lowercase();
    QUOTA_ERROR_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Checks the status and decodes the JSON body.
pub async fn read_json<T: DeserializeOwned>(
    provider: &'static str,
    response: Response,
) -> Result<T, ProviderError> {
    let response = check_response(provider, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::decode(provider, e))
}
