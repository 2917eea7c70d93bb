//! n8n webhook forwarder

use reqwest::Client;
use serde_json::Value;

use super::trait_::{ProviderError, http_client};

const PROVIDER: &str = "n8n";

#[derive(Debug, Clone)]
pub struct N8nClient {
    http: Client,
    webhook_url: Option<String>,
}

impl N8nClient {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            http: http_client(),
            webhook_url,
        }
    }

    /// Posts `payload` to the configured webhook.
    ///
    /// A non-2xx answer is returned as [`ProviderError::Http`] carrying the upstream status and
    /// body so callers can relay it.
    pub async fn forward(&self, payload: &Value) -> Result<(), ProviderError> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(PROVIDER, "N8N_WEBHOOK_URL is not set"))?;

        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Http {
            provider: PROVIDER,
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn forward_relays_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({ "event": "handbook" })))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let client = N8nClient::new(Some(format!("{}/hook", server.uri())));
        let err = client
            .forward(&json!({ "event": "handbook" }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Http { status: 422, ref body, .. } if body == "bad payload"
        ));
    }

    #[tokio::test]
    async fn forward_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = N8nClient::new(Some(format!("{}/hook", server.uri())));
        client.forward(&json!({})).await.unwrap();
    }
}
