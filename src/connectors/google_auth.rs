//! Google OAuth token endpoint client (refresh grant only)

use reqwest::Client;
use serde::Deserialize;

use super::trait_::{ProviderError, http_client, read_json};

const PROVIDER: &str = "google";

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: Option<i64>,
    /// Google only rotates the refresh token occasionally
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GoogleTokenClient {
    http: Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl GoogleTokenClient {
    pub fn new(
        token_url: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http: http_client(),
            token_url: token_url.into(),
            client_id,
            client_secret,
        }
    }

    /// Exchanges a refresh token for a fresh access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            return Err(ProviderError::not_configured(
                PROVIDER,
                "GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET are required to refresh tokens",
            ));
        };

        let params = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;
        read_json(PROVIDER, response).await
    }
}
