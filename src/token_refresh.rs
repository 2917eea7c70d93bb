//! # Token Refresh
//!
//! Resolves a usable access token for a user's integration, refreshing Google tokens that
//! expire within [`REFRESH_MARGIN_SECS`] with the stored refresh token.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::prelude::DateTimeWithTimeZone;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::connectors::{GoogleTokenClient, ProviderError};
use crate::models::user_integration;
use crate::repositories::IntegrationRepository;

/// Tokens expiring sooner than this are refreshed before use
pub const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("{platform} is not connected for this user")]
    NotConnected { platform: String },

    #[error("{platform} integration has no access token")]
    MissingAccessToken { platform: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// An access token together with the integration it belongs to
#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub access_token: String,
    pub integration: user_integration::Model,
}

pub fn needs_refresh(expires_at: Option<DateTimeWithTimeZone>, now: DateTime<Utc>) -> bool {
    expires_at.is_some_and(|expires| expires <= now + Duration::seconds(REFRESH_MARGIN_SECS))
}

#[derive(Debug, Clone)]
pub struct TokenRefresher {
    integrations: IntegrationRepository,
    google: GoogleTokenClient,
}

impl TokenRefresher {
    pub fn new(integrations: IntegrationRepository, google: GoogleTokenClient) -> Self {
        Self {
            integrations,
            google,
        }
    }

    /// Access token for the user's active integration on `platform`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn access_token(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> Result<ResolvedToken, TokenError> {
        let integration = self
            .integrations
            .find_active(user_id, platform)
            .await?
            .ok_or_else(|| TokenError::NotConnected {
                platform: platform.to_string(),
            })?;
        self.ensure_fresh(integration).await
    }

    pub async fn ensure_fresh(
        &self,
        integration: user_integration::Model,
    ) -> Result<ResolvedToken, TokenError> {
        let tokens = self.integrations.decrypt_tokens(&integration)?;
        let access_token = tokens
            .access_token
            .ok_or_else(|| TokenError::MissingAccessToken {
                platform: integration.platform.clone(),
            })?;

        let now = Utc::now();
        if !needs_refresh(integration.token_expires_at, now) {
            return Ok(ResolvedToken {
                access_token,
                integration,
            });
        }
        let Some(refresh_token) = tokens.refresh_token else {
            warn!(
                platform = %integration.platform,
                "Access token near expiry and no refresh token stored"
            );
            return Ok(ResolvedToken {
                access_token,
                integration,
            });
        };

        let platform = integration.platform.clone();
        let grant = match self.google.refresh(&refresh_token).await {
            Ok(grant) => grant,
            Err(e) => {
                counter!("token_refresh_total", "platform" => platform, "outcome" => "failed")
                    .increment(1);
                return Err(e.into());
            }
        };
        let expires_at = grant
            .expires_in
            .map(|secs| (now + Duration::seconds(secs)).fixed_offset());
        let integration = self
            .integrations
            .store_refreshed_token(
                integration,
                &grant.access_token,
                grant.refresh_token.as_deref(),
                expires_at,
            )
            .await?;

        counter!("token_refresh_total", "platform" => platform.clone(), "outcome" => "refreshed")
            .increment(1);
        info!(platform = %platform, "Access token refreshed");
        Ok(ResolvedToken {
            access_token: grant.access_token,
            integration,
        })
    }
}
