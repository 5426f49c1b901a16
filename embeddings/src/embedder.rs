//! Embedding providers.
//!
//! An [`Embedder`] is selected once when a store opens and held for the
//! store's lifetime. Besides turning text into vectors it reports the
//! token budget of a single embedding call and estimates token counts,
//! which the store layer needs to chunk oversized queries.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbedderError, Result};

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Get the name of this embedder.
    fn name(&self) -> &str;

    /// Get the dimension of produced embeddings.
    fn dimension(&self) -> usize;

    /// Maximum number of tokens a single embedding call accepts.
    fn max_tokens(&self) -> usize;

    /// Estimate the number of tokens in the given text.
    ///
    /// This is a cheap heuristic used to size query chunks, not an exact
    /// tokenizer pass.
    fn estimate_token_count(&self, text: &str) -> usize;

    /// Generate an embedding for the given text.
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// OpenAI embedding provider.
pub struct OpenAiEmbedder {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model to use.
    model: String,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for OpenAiEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536,
        }
    }

    fn max_tokens(&self) -> usize {
        8192
    }

    fn estimate_token_count(&self, text: &str) -> usize {
        // Roughly four characters per token for English text.
        text.len().div_ceil(4)
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(EmbedderError::ProviderNotConfigured)?;

        debug!("Generating embedding with model: {}", self.model);

        let body = serde_json::json!({
            "input": text,
            "model": self.model
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbedderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbedderError::ApiRequest(format!(
                "API error: {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response.json().await?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::InvalidResponse("No embedding in response".to_string()))?
            .embedding;

        info!("Generated embedding with {} dimensions", embedding.len());

        Ok(embedding)
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

/// Deterministic offline embedder.
///
/// Each whitespace-separated word hashes to a fixed coordinate, so
/// identical texts always produce identical vectors and texts sharing
/// words land closer together. No model is involved; this exists for
/// local development and for tests that need stable geometry.
pub struct HashingEmbedder {
    dimension: usize,
    max_tokens: usize,
}

impl HashingEmbedder {
    /// Create a new hashing embedder with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            max_tokens: 512,
        }
    }

    /// Override the advertised token budget.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn word_coordinate(&self, word: &str) -> (usize, f32) {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let h = hasher.finish();

        let index = (h % self.dimension as u64) as usize;
        let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn estimate_token_count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut embedding = vec![0.0f32; self.dimension];

        for word in text.split_whitespace() {
            let (index, sign) = self.word_coordinate(word);
            embedding[index] += sign;
        }

        crate::similarity::normalize(&mut embedding);
        Ok(embedding)
    }
}
