//! User integration repository
//!
//! Owns token encryption: ciphertexts never leave this module except as opaque bytes on the
//! model, and plaintext tokens are only returned by [`IntegrationRepository::decrypt_tokens`].

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::crypto::{CryptoKey, open_token, seal_token};
use crate::models::user_integration::{self, Entity as UserIntegration};

pub const PLATFORM_GMAIL: &str = "gmail";
pub const PLATFORM_GOOGLE_CALENDAR: &str = "google_calendar";
pub const PLATFORM_HUBSPOT: &str = "hubspot";
pub const PLATFORM_SLACK: &str = "slack";
pub const PLATFORM_PERISKOPE: &str = "periskope";

pub const PLATFORMS: [&str; 5] = [
    PLATFORM_GMAIL,
    PLATFORM_GOOGLE_CALENDAR,
    PLATFORM_HUBSPOT,
    PLATFORM_SLACK,
    PLATFORM_PERISKOPE,
];

pub fn is_known_platform(platform: &str) -> bool {
    PLATFORMS.contains(&platform)
}

/// Decrypted token pair
#[derive(Debug, Clone, Default)]
pub struct IntegrationTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Shallow-merges `patch` into `base`, treating a non-object base as empty.
pub fn merge_metadata(base: Option<Value>, patch: Value) -> Value {
    let mut merged = match base {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Value::Object(patch) = patch {
        for (key, value) in patch {
            merged.insert(key, value);
        }
    }
    Value::Object(merged)
}

#[derive(Debug, Clone)]
pub struct IntegrationRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl IntegrationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    fn seal(&self, user_id: Uuid, platform: &str, token: Option<&str>) -> Result<Option<Vec<u8>>> {
        token
            .map(|t| seal_token(&self.crypto_key, user_id, platform, t))
            .transpose()
            .map_err(|e| anyhow!("Token encryption failed: {}", e))
    }

    /// Stores tokens for (user, platform), creating the integration or replacing its tokens.
    ///
    /// A `None` refresh token keeps the stored one.
    pub async fn upsert_tokens(
        &self,
        user_id: Uuid,
        platform: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<DateTimeWithTimeZone>,
        metadata: Option<Value>,
    ) -> Result<user_integration::Model> {
        let now = Utc::now().fixed_offset();
        let access_ciphertext = self.seal(user_id, platform, Some(access_token))?;
        let refresh_ciphertext = self.seal(user_id, platform, refresh_token)?;

        if let Some(existing) = self.find(user_id, platform).await? {
            let merged = match metadata {
                Some(patch) => Some(merge_metadata(existing.metadata.clone(), patch)),
                None => existing.metadata.clone(),
            };
            let mut active: user_integration::ActiveModel = existing.into();
            active.access_token_ciphertext = Set(access_ciphertext);
            if refresh_ciphertext.is_some() {
                active.refresh_token_ciphertext = Set(refresh_ciphertext);
            }
            active.token_expires_at = Set(token_expires_at);
            active.metadata = Set(merged);
            active.is_active = Set(true);
            active.updated_at = Set(now);
            return Ok(active.update(&*self.db).await?);
        }

        let row = user_integration::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            platform: Set(platform.to_string()),
            is_active: Set(true),
            access_token_ciphertext: Set(access_ciphertext),
            refresh_token_ciphertext: Set(refresh_ciphertext),
            token_expires_at: Set(token_expires_at),
            last_sync_at: Set(None),
            metadata: Set(metadata),
            created_at: Set(now),
            updated_at: Set(now),
        };

        UserIntegration::insert(row)
            .on_conflict(
                OnConflict::columns([
                    user_integration::Column::UserId,
                    user_integration::Column::Platform,
                ])
                .update_columns([
                    user_integration::Column::AccessTokenCiphertext,
                    user_integration::Column::TokenExpiresAt,
                    user_integration::Column::IsActive,
                    user_integration::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find(user_id, platform)
            .await?
            .ok_or_else(|| anyhow!("Integration {} for user {} vanished after insert", platform, user_id))
    }

    pub async fn find(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> Result<Option<user_integration::Model>> {
        Ok(UserIntegration::find()
            .filter(user_integration::Column::UserId.eq(user_id))
            .filter(user_integration::Column::Platform.eq(platform))
            .one(&*self.db)
            .await?)
    }

    /// Active integration for (user, platform)
    pub async fn find_active(
        &self,
        user_id: Uuid,
        platform: &str,
    ) -> Result<Option<user_integration::Model>> {
        Ok(self
            .find(user_id, platform)
            .await?
            .filter(|integration| integration.is_active))
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<user_integration::Model>> {
        Ok(UserIntegration::find()
            .filter(user_integration::Column::UserId.eq(user_id))
            .order_by_asc(user_integration::Column::Platform)
            .all(&*self.db)
            .await?)
    }

    /// Distinct users with at least one active integration on any of `platforms`.
    pub async fn active_user_ids(&self, platforms: &[&str]) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = UserIntegration::find()
            .select_only()
            .column(user_integration::Column::UserId)
            .filter(user_integration::Column::IsActive.eq(true))
            .filter(user_integration::Column::Platform.is_in(platforms.iter().copied()))
            .distinct()
            .order_by_asc(user_integration::Column::UserId)
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(ids)
    }

    pub fn decrypt_tokens(&self, integration: &user_integration::Model) -> Result<IntegrationTokens> {
        let open = |ciphertext: &Option<Vec<u8>>| -> Result<Option<String>> {
            ciphertext
                .as_deref()
                .map(|bytes| {
                    open_token(
                        &self.crypto_key,
                        integration.user_id,
                        &integration.platform,
                        bytes,
                    )
                })
                .transpose()
                .map_err(|e| anyhow!("Token decryption failed: {}", e))
        };

        Ok(IntegrationTokens {
            access_token: open(&integration.access_token_ciphertext)?,
            refresh_token: open(&integration.refresh_token_ciphertext)?,
        })
    }

    /// Replaces the access token after a refresh, rotating the refresh token when one was issued.
    pub async fn store_refreshed_token(
        &self,
        integration: user_integration::Model,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<DateTimeWithTimeZone>,
    ) -> Result<user_integration::Model> {
        let user_id = integration.user_id;
        let platform = integration.platform.clone();
        let access_ciphertext = self.seal(user_id, &platform, Some(access_token))?;
        let refresh_ciphertext = self.seal(user_id, &platform, refresh_token)?;

        let mut active: user_integration::ActiveModel = integration.into();
        active.access_token_ciphertext = Set(access_ciphertext);
        if refresh_ciphertext.is_some() {
            active.refresh_token_ciphertext = Set(refresh_ciphertext);
        }
        active.token_expires_at = Set(token_expires_at);
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(active.update(&*self.db).await?)
    }

    /// Merges `patch` into the integration's metadata and stamps `last_sync_at`.
    pub async fn record_sync(
        &self,
        integration_id: Uuid,
        patch: Value,
    ) -> Result<user_integration::Model> {
        let existing = UserIntegration::find_by_id(integration_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("Integration '{}' not found", integration_id))?;

        let now = Utc::now().fixed_offset();
        let merged = merge_metadata(existing.metadata.clone(), patch);
        let mut active: user_integration::ActiveModel = existing.into();
        active.metadata = Set(Some(merged));
        active.last_sync_at = Set(Some(now));
        active.updated_at = Set(now);
        Ok(active.update(&*self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    use crate::repositories::UserRepository;

    async fn setup() -> (IntegrationRepository, UserRepository) {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        Migrator::up(&*db, None).await.unwrap();
        let key = CryptoKey::new(vec![9u8; 32]).unwrap();
        (
            IntegrationRepository::new(db.clone(), key),
            UserRepository::new(db),
        )
    }

    #[test]
    fn merge_metadata_overwrites_top_level_keys() {
        let merged = merge_metadata(
            Some(json!({ "historyId": "1", "messages": 5 })),
            json!({ "historyId": "9" }),
        );
        assert_eq!(merged, json!({ "historyId": "9", "messages": 5 }));
        assert_eq!(merge_metadata(None, json!({ "a": 1 })), json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn tokens_are_encrypted_at_rest_and_round_trip() {
        let (repo, users) = setup().await;
        let user = users.get_or_create("user_1").await.unwrap();

        let stored = repo
            .upsert_tokens(user.id, PLATFORM_GMAIL, "ya29.access", Some("1//refresh"), None, None)
            .await
            .unwrap();

        let ciphertext = stored.access_token_ciphertext.clone().unwrap();
        assert!(!String::from_utf8_lossy(&ciphertext).contains("ya29.access"));

        let tokens = repo.decrypt_tokens(&stored).unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("ya29.access"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
    }

    #[tokio::test]
    async fn upsert_keeps_refresh_token_and_merges_metadata() {
        let (repo, users) = setup().await;
        let user = users.get_or_create("user_2").await.unwrap();

        let first = repo
            .upsert_tokens(
                user.id,
                PLATFORM_GMAIL,
                "a1",
                Some("r1"),
                None,
                Some(json!({ "historyId": "100" })),
            )
            .await
            .unwrap();
        let second = repo
            .upsert_tokens(user.id, PLATFORM_GMAIL, "a2", None, None, Some(json!({ "x": 1 })))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let tokens = repo.decrypt_tokens(&second).unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("a2"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
        assert_eq!(second.metadata, Some(json!({ "historyId": "100", "x": 1 })));
    }

    #[tokio::test]
    async fn active_user_ids_filters_platforms() {
        let (repo, users) = setup().await;
        let a = users.get_or_create("a").await.unwrap();
        let b = users.get_or_create("b").await.unwrap();
        repo.upsert_tokens(a.id, PLATFORM_GMAIL, "t", None, None, None)
            .await
            .unwrap();
        repo.upsert_tokens(a.id, PLATFORM_GOOGLE_CALENDAR, "t", None, None, None)
            .await
            .unwrap();
        repo.upsert_tokens(b.id, PLATFORM_SLACK, "t", None, None, None)
            .await
            .unwrap();

        let ids = repo
            .active_user_ids(&[PLATFORM_GMAIL, PLATFORM_GOOGLE_CALENDAR])
            .await
            .unwrap();
        assert_eq!(ids, vec![a.id]);
    }
}
