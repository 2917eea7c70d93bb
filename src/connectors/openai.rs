//! Embedding generation
//!
//! [`EmbeddingProvider`] is the seam the queue processor depends on; [`OpenAiEmbedder`] is the
//! production implementation against the OpenAI embeddings endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::trait_::{ProviderError, http_client, read_json};

const PROVIDER: &str = "openai";

/// Longest input (in characters) submitted for embedding
pub const MAX_EMBEDDING_CHARS: usize = 8000;

/// Collapses whitespace runs and truncates to [`MAX_EMBEDDING_CHARS`] characters.
pub fn prepare_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(MAX_EMBEDDING_CHARS) {
        Some((byte_idx, _)) => collapsed[..byte_idx].to_string(),
        None => collapsed,
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the embedding vector for already-prepared text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(PROVIDER, "OPENAI_API_KEY is not set"))?;

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        let body: EmbeddingResponse = read_json(PROVIDER, response).await?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::decode(PROVIDER, "response contained no embedding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn prepare_text_collapses_whitespace_and_truncates() {
        assert_eq!(prepare_text("  a\n\n b\tc  "), "a b c");

        let long = "é".repeat(MAX_EMBEDDING_CHARS + 50);
        let prepared = prepare_text(&long);
        assert_eq!(prepared.chars().count(), MAX_EMBEDDING_CHARS);
    }

    #[tokio::test]
    async fn embed_returns_first_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(json!({ "model": "text-embedding-3-small" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(
            server.uri(),
            Some("sk-test".to_string()),
            "text-embedding-3-small",
        );
        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn embed_requires_api_key() {
        let embedder = OpenAiEmbedder::new("http://localhost:1", None, "m");
        assert!(matches!(
            embedder.embed("x").await,
            Err(ProviderError::NotConfigured { .. })
        ));
    }
}
