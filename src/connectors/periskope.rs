//! Periskope (WhatsApp) REST client

use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::trait_::{ProviderError, http_client, read_json};

const PROVIDER: &str = "periskope";

/// Page size used for message listing
pub const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SerializedId {
    pub serialized: Option<String>,
}

/// Chat message as returned by `/chats/{id}/messages`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriskopeMessage {
    pub message_id: Option<String>,
    pub id: Option<SerializedId>,
    pub body: Option<String>,
    pub sender_phone: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub chat_id: Option<String>,
    pub message_type: Option<String>,
    pub org_id: Option<String>,
    pub unique_id: Option<String>,
    pub ack: Option<Value>,
}

impl PeriskopeMessage {
    /// `message_id`, falling back to `id.serialized`
    pub fn platform_id(&self) -> Option<&str> {
        self.message_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.id.as_ref().and_then(|id| id.serialized.as_deref()))
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesPage {
    #[serde(default)]
    pub messages: Vec<PeriskopeMessage>,
    /// Total messages in the chat, when reported
    pub count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PeriskopeClient {
    http: Client,
    base_url: String,
}

impl PeriskopeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn list_messages(
        &self,
        api_key: &str,
        chat_id: &str,
        offset: u64,
        limit: u32,
    ) -> Result<MessagesPage, ProviderError> {
        // Keys are sometimes stored with the scheme already attached
        let key = api_key.strip_prefix("Bearer ").unwrap_or(api_key);

        let response = self
            .http
            .get(format!("{}/chats/{}/messages", self.base_url, chat_id))
            .bearer_auth(key)
            .header("Accept", "application/json")
            .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
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
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn platform_id_falls_back_to_serialized_id() {
        let msg: PeriskopeMessage = serde_json::from_value(json!({
            "id": { "serialized": "false_123@c.us_ABC" },
            "body": "hello"
        }))
        .unwrap();
        assert_eq!(msg.platform_id(), Some("false_123@c.us_ABC"));

        let msg: PeriskopeMessage = serde_json::from_value(json!({
            "message_id": "m-1",
            "id": { "serialized": "other" }
        }))
        .unwrap();
        assert_eq!(msg.platform_id(), Some("m-1"));

        assert_eq!(PeriskopeMessage::default().platform_id(), None);
    }

    #[tokio::test]
    async fn list_messages_strips_bearer_prefix_from_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chats/123@c.us/messages"))
            .and(header("authorization", "Bearer key-1"))
            .and(query_param("offset", "100"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "from": 101, "to": 101, "count": 101,
                "messages": [{
                    "message_id": "m-101",
                    "body": "last one",
                    "from_me": true,
                    "timestamp": "2025-01-05T10:00:00Z",
                    "sender_phone": "15550001@c.us"
                }]
            })))
            .mount(&server)
            .await;

        let client = PeriskopeClient::new(server.uri());
        let page = client
            .list_messages("Bearer key-1", "123@c.us", 100, PAGE_LIMIT)
            .await
            .unwrap();
        assert_eq!(page.count, Some(101));
        assert_eq!(page.messages.len(), 1);
        assert!(page.messages[0].from_me);
    }
}
