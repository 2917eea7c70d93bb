//! Shared fixtures for integration tests.
//!
//! Every test gets its own in-memory SQLite database with migrations applied and a router
//! built exactly as the server builds it, with the ledger and embedder swapped for fakes.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use crm_sync::config::AppConfig;
use crm_sync::connectors::{EmbeddingProvider, ProviderError};
use crm_sync::crypto::CryptoKey;
use crm_sync::partner_billing::{InMemoryLedger, PartnerLedger};
use crm_sync::server::{AppState, create_app};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const OPERATOR_TOKEN: &str = "test-operator-token";
pub const CRON_SECRET: &str = "test-cron-secret";
pub const TEST_USER: &str = "user_test_1";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Configuration with auth secrets set and every delay disabled.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        cron_secret: Some(CRON_SECRET.to_string()),
        crypto_key: Some(vec![42u8; 32]),
        ..AppConfig::default()
    };
    config.sync.chunk_delay_ms = 0;
    config.sync.user_delay_ms = 0;
    config.embedding.item_delay_ms = 0;
    config
}

/// Returns a constant vector; fails for text containing "explode".
pub struct StaticEmbedder;

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.contains("explode") {
            return Err(ProviderError::Http {
                provider: "openai",
                status: 500,
                body: "upstream failure".to_string(),
            });
        }
        Ok(vec![0.1, 0.2, 0.3])
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub async fn new(config: AppConfig) -> Result<Self> {
        Self::with_ledger(config, Arc::new(InMemoryLedger::new(Vec::new()))).await
    }

    pub async fn with_ledger(config: AppConfig, ledger: Arc<dyn PartnerLedger>) -> Result<Self> {
        let db = setup_test_db().await?;
        let crypto_key = CryptoKey::new(config.crypto_key.clone().unwrap_or(vec![42u8; 32]))?;
        let state = AppState::new(Arc::new(config), Arc::new(db), crypto_key)
            .with_ledger(ledger)
            .with_embedder(Arc::new(StaticEmbedder));
        let router = create_app(state.clone());
        Ok(Self { state, router })
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    /// Sends a request and returns the status with the body parsed as JSON (`Null` if empty).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body is readable");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }
}

fn with_json(builder: axum::http::request::Builder, body: Option<Value>) -> Request<Body> {
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("valid request"),
        None => builder.body(Body::empty()).expect("valid request"),
    }
}

/// Request authenticated as an operator acting for `user`.
pub fn user_request(method: &str, uri: &str, user: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
        .header("X-User-Id", user);
    with_json(builder, body)
}

/// Request carrying the cron secret.
pub fn cron_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {CRON_SECRET}"))
        .body(Body::empty())
        .expect("valid request")
}

/// A full-format Gmail message as returned by `users/me/messages/{id}`.
pub fn gmail_message(id: &str, subject: &str) -> Value {
    json!({
        "id": id,
        "threadId": format!("t-{id}"),
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": format!("{subject} snippet"),
        "internalDate": "1735725600000",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                { "name": "Subject", "value": subject },
                { "name": "From", "value": "Grace Hopper <grace@navy.example>" },
                { "name": "To", "value": "ops@crm.example" }
            ],
            "body": { "data": "SGVsbG8gdGhlcmU" }
        }
    })
}

/// Stores an integration for `TEST_USER` through the API.
pub async fn connect_integration(app: &TestApp, platform: &str, metadata: Option<Value>) {
    let (status, body) = app
        .send(user_request(
            "PUT",
            &format!("/api/integrations/{platform}"),
            TEST_USER,
            Some(json!({
                "accessToken": format!("{platform}-access"),
                "refreshToken": format!("{platform}-refresh"),
                "tokenExpiresAt": "2099-01-01T00:00:00Z",
                "metadata": metadata
            })),
        ))
        .await;
    assert_eq!(status, 200, "{body}");
}
