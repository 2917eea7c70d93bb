//! Slack Web API client
//!
//! Slack answers most failures with HTTP 200 and `{"ok": false, "error": "..."}`, so every
//! response is checked twice.

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::trait_::{ProviderError, http_client, read_json};

const PROVIDER: &str = "slack";

/// Page size for `conversations.history`
pub const HISTORY_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessage {
    /// Message timestamp, unique per channel
    pub ts: String,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
    pub subtype: Option<String>,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ResponseMetadata {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

/// One page of channel history
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<SlackMessage>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlackClient {
    http: Client,
    base_url: String,
    bot_token: Option<String>,
}

impl SlackClient {
    pub fn new(base_url: impl Into<String>, bot_token: Option<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    fn token<'a>(&'a self, override_token: Option<&'a str>) -> Result<&'a str, ProviderError> {
        override_token
            .or(self.bot_token.as_deref())
            .ok_or_else(|| ProviderError::not_configured(PROVIDER, "SLACK_BOT_TOKEN is not set"))
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let body: Value = read_json(PROVIDER, response).await?;
        let envelope: Envelope =
            serde_json::from_value(body.clone()).map_err(|e| ProviderError::decode(PROVIDER, e))?;
        if !envelope.ok {
            let error = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(match error.as_str() {
                "invalid_auth" | "not_authed" | "token_revoked" | "account_inactive" => {
                    ProviderError::Unauthorized {
                        provider: PROVIDER,
                        message: error,
                    }
                }
                "channel_not_found" => ProviderError::NotFound {
                    provider: PROVIDER,
                    message: error,
                },
                "ratelimited" => ProviderError::RateLimited {
                    provider: PROVIDER,
                    retry_after_secs: super::trait_::DEFAULT_RETRY_AFTER_SECS,
                },
                _ => ProviderError::Http {
                    provider: PROVIDER,
                    status: 200,
                    body: error,
                },
            });
        }
        serde_json::from_value(body).map_err(|e| ProviderError::decode(PROVIDER, e))
    }

    /// Reads one page of `conversations.history`, newest first.
    pub async fn conversation_history(
        &self,
        token: Option<&str>,
        channel: &str,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, ProviderError> {
        let token = self.token(token)?;
        let limit = HISTORY_PAGE_LIMIT.to_string();
        let mut request = self
            .http
            .get(format!("{}/conversations.history", self.base_url))
            .bearer_auth(token)
            .query(&[("channel", channel), ("limit", limit.as_str())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        let body: HistoryResponse = Self::unwrap_envelope(response).await?;

        Ok(HistoryPage {
            messages: body.messages,
            next_cursor: body
                .response_metadata
                .next_cursor
                .filter(|c| !c.is_empty()),
        })
    }

    pub async fn post_message(
        &self,
        token: Option<&str>,
        channel: &str,
        text: &str,
    ) -> Result<PostedMessage, ProviderError> {
        let token = self.token(token)?;
        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(token)
            .json(&json!({ "channel": channel, "text": text }))
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        Self::unwrap_envelope(response).await
    }
}
