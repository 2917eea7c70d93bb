//! # Cursor Utilities
//!
//! Opaque keyset cursors for list endpoints. A cursor is base64-encoded JSON holding the sort
//! timestamp and id of the last row returned.

use axum::http::StatusCode;
use base64::Engine;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

const MAX_CURSOR_LEN: usize = 1000;
const MAX_DECODED_LEN: usize = 500;

/// Position of the last row returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorData {
    pub at: DateTime<FixedOffset>,
    pub id: Uuid,
}

/// Encode cursor data as an opaque base64 string
pub fn encode_cursor(at: &DateTime<FixedOffset>, id: &Uuid) -> String {
    let json = serde_json::json!({ "at": at.to_rfc3339(), "id": id.to_string() });
    base64::engine::general_purpose::STANDARD.encode(json.to_string().as_bytes())
}

fn invalid(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}

/// Decode cursor data from an opaque base64 string with validation
pub fn decode_cursor(cursor: &str) -> Result<CursorData, ApiError> {
    if cursor.is_empty() {
        return Err(invalid("cursor cannot be empty"));
    }
    if cursor.len() > MAX_CURSOR_LEN {
        return Err(invalid("cursor is too long"));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(cursor)
        .map_err(|_| invalid("cursor is not valid base64"))?;

    if decoded.is_empty() || decoded.len() > MAX_DECODED_LEN {
        return Err(invalid("decoded cursor has an invalid size"));
    }

    serde_json::from_slice::<CursorData>(&decoded)
        .map_err(|_| invalid("cursor contains invalid JSON structure"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn cursor_survives_encoding() {
        let at = Utc
            .with_ymd_and_hms(2025, 3, 1, 8, 30, 0)
            .unwrap()
            .fixed_offset();
        let id = Uuid::new_v4();

        let decoded = decode_cursor(&encode_cursor(&at, &id)).unwrap();
        assert_eq!(decoded, CursorData { at, id });
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        assert!(decode_cursor("").is_err());
        assert!(decode_cursor("!!not-base64!!").is_err());
        assert!(decode_cursor(&"A".repeat(MAX_CURSOR_LEN + 4)).is_err());

        let not_cursor = base64::engine::general_purpose::STANDARD.encode(b"{\"foo\":1}");
        let err = decode_cursor(&not_cursor).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
