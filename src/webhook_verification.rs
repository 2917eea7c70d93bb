//! # Webhook Signature Verification
//!
//! Slack signs event deliveries with `v0=HMAC_SHA256(signing_secret, "v0:{ts}:{body}")`.
//! Signatures are compared in constant time and the timestamp must fall inside the configured
//! tolerance window.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SLACK_SIGNATURE_HEADER: &str = "x-slack-signature";
pub const SLACK_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Slack event payloads are small; anything larger is rejected before hashing.
const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: &'static str },

    #[error("Invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: &'static str },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Missing required timestamp header: {header}")]
    MissingTimestamp { header: &'static str },

    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    #[error("Timestamp too old: {seconds}s old, max allowed: {max_seconds}s")]
    TimestampTooOld { seconds: u64, max_seconds: u64 },

    #[error("Timestamp too far in future: {seconds}s in future, max allowed: {max_seconds}s")]
    TimestampTooFuture { seconds: u64, max_seconds: u64 },

    #[error("Slack signing secret is not configured")]
    NotConfigured,
}

impl VerificationError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }
}

pub type VerificationResult<T> = Result<T, VerificationError>;

/// Hex signature (`v0=` prefixed) for a body at a timestamp.
pub fn sign_slack_request(secret: &str, timestamp: u64, body: &[u8]) -> String {
    format!("v0={}", hex::encode(slack_mac(secret, timestamp, body)))
}

fn slack_mac(secret: &str, timestamp: u64, body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies a Slack signature against the current clock.
pub fn verify_slack_signature(
    body: &[u8],
    signature_header: &str,
    timestamp_header: &str,
    secret: &str,
    tolerance_seconds: u64,
) -> VerificationResult<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    verify_slack_signature_at(
        body,
        signature_header,
        timestamp_header,
        secret,
        tolerance_seconds,
        now,
    )
}

pub fn verify_slack_signature_at(
    body: &[u8],
    signature_header: &str,
    timestamp_header: &str,
    secret: &str,
    tolerance_seconds: u64,
    now: u64,
) -> VerificationResult<()> {
    debug!(body_size = body.len(), tolerance_seconds, "Verifying Slack signature");

    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: SLACK_SIGNATURE_HEADER,
        });
    }
    if timestamp_header.is_empty() {
        return Err(VerificationError::MissingTimestamp {
            header: SLACK_TIMESTAMP_HEADER,
        });
    }

    let timestamp =
        timestamp_header
            .parse::<u64>()
            .map_err(|_| VerificationError::InvalidTimestamp {
                value: timestamp_header.to_string(),
            })?;

    let drift = now.abs_diff(timestamp);
    if drift > tolerance_seconds {
        return Err(if now > timestamp {
            VerificationError::TimestampTooOld {
                seconds: drift,
                max_seconds: tolerance_seconds,
            }
        } else {
            VerificationError::TimestampTooFuture {
                seconds: drift,
                max_seconds: tolerance_seconds,
            }
        });
    }

    let provided_hex = signature_header.strip_prefix("v0=").ok_or(
        VerificationError::InvalidSignatureFormat {
            reason: "signature must start with 'v0='",
        },
    )?;
    let provided = hex::decode(provided_hex).map_err(|_| {
        VerificationError::InvalidSignatureFormat {
            reason: "signature is not valid hex",
        }
    })?;

    let expected = slack_mac(secret, timestamp, body);
    if !expected.is_empty() && bool::from(expected.ct_eq(&provided)) {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
}

/// Rejects requests whose Slack signature does not verify; the body is buffered and handed on.
pub async fn slack_verification_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(secret) = config.providers.slack_signing_secret.as_deref() else {
        warn!("Slack webhook received but no signing secret is configured");
        return Err(VerificationError::NotConfigured.status_code());
    };

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_WEBHOOK_BODY_BYTES)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to read Slack webhook body");
            StatusCode::BAD_REQUEST
        })?;

    match verify_slack_signature(
        &body_bytes,
        header(&parts.headers, SLACK_SIGNATURE_HEADER),
        header(&parts.headers, SLACK_TIMESTAMP_HEADER),
        secret,
        config.providers.slack_tolerance_seconds,
    ) {
        Ok(()) => {
            let request = Request::from_parts(parts, Body::from(body_bytes));
            Ok(next.run(request).await)
        }
        Err(e) => {
            warn!(error = %e, "Slack webhook signature rejected");
            Err(e.status_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const NOW: u64 = 1_531_420_618;
    const BODY: &[u8] = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&command=%2Fweather";

    #[test]
    fn accepts_valid_signature() {
        let signature = sign_slack_request(SECRET, NOW, BODY);
        let result =
            verify_slack_signature_at(BODY, &signature, &NOW.to_string(), SECRET, 300, NOW + 10);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn rejects_forged_body() {
        let signature = sign_slack_request(SECRET, NOW, BODY);
        let result = verify_slack_signature_at(
            b"token=forged",
            &signature,
            &NOW.to_string(),
            SECRET,
            300,
            NOW,
        );
        assert_eq!(result, Err(VerificationError::VerificationFailed));
    }

    #[test]
    fn rejects_wrong_secret() {
        let signature = sign_slack_request("another-secret", NOW, BODY);
        let result = verify_slack_signature_at(BODY, &signature, &NOW.to_string(), SECRET, 300, NOW);
        assert_eq!(result, Err(VerificationError::VerificationFailed));
    }

    #[test]
    fn rejects_stale_and_future_timestamps() {
        let signature = sign_slack_request(SECRET, NOW, BODY);
        assert!(matches!(
            verify_slack_signature_at(BODY, &signature, &NOW.to_string(), SECRET, 300, NOW + 301),
            Err(VerificationError::TimestampTooOld { seconds: 301, .. })
        ));
        assert!(matches!(
            verify_slack_signature_at(BODY, &signature, &NOW.to_string(), SECRET, 300, NOW - 400),
            Err(VerificationError::TimestampTooFuture { .. })
        ));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(matches!(
            verify_slack_signature_at(BODY, "", "1", SECRET, 300, NOW),
            Err(VerificationError::MissingSignature { .. })
        ));
        assert!(matches!(
            verify_slack_signature_at(BODY, "v0=00", "", SECRET, 300, NOW),
            Err(VerificationError::MissingTimestamp { .. })
        ));
        assert!(matches!(
            verify_slack_signature_at(BODY, "v0=00", "yesterday", SECRET, 300, NOW),
            Err(VerificationError::InvalidTimestamp { .. })
        ));
        assert!(matches!(
            verify_slack_signature_at(BODY, "sha256=00", &NOW.to_string(), SECRET, 300, NOW),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
        assert!(matches!(
            verify_slack_signature_at(BODY, "v0=zz", &NOW.to_string(), SECRET, 300, NOW),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
    }
}
