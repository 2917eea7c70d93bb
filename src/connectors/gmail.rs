//! Gmail REST client
//!
//! Message listing, full message fetch, profile and history reads. Access tokens are passed per
//! call since every user has their own.

use reqwest::Client;
use serde::Deserialize;

use super::trait_::{ProviderError, http_client, read_json};

const PROVIDER: &str = "gmail";

/// Gmail rejects `maxResults` above 500 for message lists
pub const MAX_LIST_PAGE: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

/// One page of message ids
#[derive(Debug, Clone, Default)]
pub struct MessageIdPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    /// base64url-encoded content
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// Message in `format=full`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    /// Epoch milliseconds as a string
    pub internal_date: Option<String>,
    pub payload: Option<MessagePart>,
}

impl GmailMessage {
    /// First header with the given name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|p| {
            p.headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str())
        })
    }

    /// Decoded body of the first part with the given mime type
    pub fn body_of_type(&self, mime_type: &str) -> Option<String> {
        self.payload
            .as_ref()
            .and_then(|p| find_part_body(p, mime_type))
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }
}

fn find_part_body(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(mime_type)
        && let Some(decoded) = part.body.data.as_deref().and_then(decode_body)
    {
        return Some(decoded);
    }
    part.parts.iter().find_map(|p| find_part_body(p, mime_type))
}

/// Decodes a base64url body, tolerating both padded and unpadded input.
pub fn decode_body(data: &str) -> Option<String> {
    let trimmed = data.trim_end_matches('=');
    base64_url::decode(trimmed)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailProfile {
    pub email_address: String,
    pub history_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessageChange {
    pub message: MessageRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default)]
    pub messages_added: Vec<HistoryMessageChange>,
    #[serde(default)]
    pub messages_deleted: Vec<HistoryMessageChange>,
}

/// One page of mailbox history
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    pub next_page_token: Option<String>,
    pub history_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GmailClient {
    http: Client,
    base_url: String,
}

impl GmailClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Lists message ids, newest first, with no query filter.
    pub async fn list_message_ids(
        &self,
        access_token: &str,
        page_token: Option<&str>,
        max_results: usize,
    ) -> Result<MessageIdPage, ProviderError> {
        let mut request = self
            .http
            .get(format!("{}/users/me/messages", self.base_url))
            .bearer_auth(access_token)
            .query(&[("maxResults", max_results.clamp(1, MAX_LIST_PAGE).to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        let body: MessageListResponse = read_json(PROVIDER, response).await?;

        Ok(MessageIdPage {
            ids: body.messages.into_iter().map(|m| m.id).collect(),
            next_page_token: body.next_page_token,
        })
    }

    pub async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<GmailMessage, ProviderError> {
        let response = self
            .http
            .get(format!("{}/users/me/messages/{}", self.base_url, message_id))
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        read_json(PROVIDER, response).await
    }

    pub async fn get_profile(&self, access_token: &str) -> Result<GmailProfile, ProviderError> {
        let response = self
            .http
            .get(format!("{}/users/me/profile", self.base_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        read_json(PROVIDER, response).await
    }

    /// Lists added and deleted messages since `start_history_id`.
    ///
    /// A 404 means the history id is too old and a full sync is required.
    pub async fn list_history(
        &self,
        access_token: &str,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        let mut request = self
            .http
            .get(format!("{}/users/me/history", self.base_url))
            .bearer_auth(access_token)
            .query(&[
                ("startHistoryId", start_history_id),
                ("historyTypes", "messageAdded"),
                ("historyTypes", "messageDeleted"),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        read_json(PROVIDER, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_message() -> GmailMessage {
        serde_json::from_value(json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Hi there",
            "internalDate": "1700000000000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    { "name": "Subject", "value": "Quarterly review" },
                    { "name": "from", "value": "Ana Diaz <ana@example.com>" }
                ],
                "parts": [
                    { "mimeType": "text/plain", "body": { "data": base64_url::encode("plain body") } },
                    { "mimeType": "text/html", "body": { "data": base64_url::encode("<p>html body</p>") } }
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn headers_are_case_insensitive() {
        let message = sample_message();
        assert_eq!(message.header("subject"), Some("Quarterly review"));
        assert_eq!(message.header("From"), Some("Ana Diaz <ana@example.com>"));
        assert_eq!(message.header("Cc"), None);
    }

    #[test]
    fn nested_parts_are_decoded() {
        let message = sample_message();
        assert_eq!(message.body_of_type("text/plain").as_deref(), Some("plain body"));
        assert_eq!(
            message.body_of_type("text/html").as_deref(),
            Some("<p>html body</p>")
        );
        assert!(message.has_label("UNREAD"));
    }

    #[test]
    fn padded_base64url_is_accepted() {
        assert_eq!(decode_body("aGk=").as_deref(), Some("hi"));
        assert_eq!(decode_body("aGk").as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn list_message_ids_follows_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "m3", "threadId": "t3" }]
            })))
            .mount(&server)
            .await;

        let client = GmailClient::new(server.uri());
        let page = client
            .list_message_ids("token", Some("p2"), 200)
            .await
            .unwrap();
        assert_eq!(page.ids, vec!["m3".to_string()]);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn expired_history_id_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/history"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Requested entity was not found."))
            .mount(&server)
            .await;

        let client = GmailClient::new(server.uri());
        let err = client.list_history("token", "1", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }
}
