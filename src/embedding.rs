//! Text embedding for the semantic index
//!
//! The index only ever sees an [`EmbeddingProvider`]; the concrete provider
//! talks to any OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::EmbeddingConfig;
use crate::{Error, Result};

/// Maps text to fixed-dimension vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded in the persisted index
    fn model_id(&self) -> &str;

    /// Vector dimension produced for every input
    fn dimensions(&self) -> usize;

    /// Embed several texts, preserving input order
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails or returns nothing
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }
}

/// Embedder backed by an OpenAI-compatible embeddings API
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    /// Create an embedder for the configured endpoint and model
    #[must_use]
    pub fn new(api_key: SecretString, config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        #[derive(serde::Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'a str,
            input: &'a [&'a str],
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        #[derive(serde::Deserialize)]
        struct EmbeddingData {
            embedding: Vec<f32>,
            index: usize,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("embedding API error {status}: {body}")));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("invalid embedding response: {e}")))?;

        if result.data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // Sort by index to maintain input order
        result.data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = result.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(Error::Embedding(format!(
                "model {} returned {} dimensions, expected {}",
                self.model,
                bad.len(),
                self.dimensions
            )));
        }

        tracing::trace!(count = vectors.len(), model = %self.model, "embedded batch");
        Ok(vectors)
    }
}

/// Serialize an embedding to little-endian bytes for `sqlite-vec`
#[must_use]
pub fn to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding from little-endian bytes
#[must_use]
pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}
