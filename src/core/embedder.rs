//! C3: dense text-embedding provider, unit-norm output (spec §4.3).
//!
//! Grounded on the teacher's `embeddings::openai::OpenAIEmbedder`: same batch
//! request/response shapes and the same `EmbeddingCache` LRU for query
//! embeddings, generalized behind the `Embedder` capability interface (spec
//! §9) and onto the shared `core::retry::RetryPolicy` (base 4s / cap 10s / 3
//! attempts per spec, replacing the teacher's base-1s ad hoc loop). Output
//! vectors are normalized to unit length here since the vector index and
//! cosine-similarity contract (C5) assume unit norm.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::EmbeddingCache;
use crate::core::retry::RetryPolicy;
use crate::error::{RagmcpError, Result};

/// Capability interface (spec §9) over a remote embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dim(&self) -> usize;
}

/// Lets a context struct share one embedder between the ingestion path and
/// the `Orchestrator`, which takes its embedder by value.
#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }
}

/// Rescale `v` to unit length; the zero vector is returned unchanged (spec
/// §4.3 edge case: an embedding provider that returns an all-zero vector for
/// empty/degenerate input must not produce NaNs downstream).
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in v.iter_mut() {
            *x /= magnitude;
        }
    }
    v
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible embeddings provider: the built-in `Embedder`
/// implementation a factory returns by default.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dim: usize,
    batch_size: usize,
    retry_policy: RetryPolicy,
    query_cache: Option<Arc<EmbeddingCache>>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dim: usize, batch_size: usize) -> Self {
        Self::new_with_cache(api_key, model, dim, batch_size, None)
    }

    pub fn new_with_cache(
        api_key: String,
        model: String,
        dim: usize,
        batch_size: usize,
        query_cache: Option<Arc<EmbeddingCache>>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key,
            model,
            dim,
            batch_size: batch_size.min(2048),
            retry_policy: RetryPolicy::spec_default(),
            query_cache,
        }
    }

    async fn embed_batch_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| RagmcpError::Embedding(format!("Network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response".to_string());
            return Err(RagmcpError::Embedding(format!(
                "OpenAI embeddings API error {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagmcpError::Embedding(format!("Failed to parse response: {e}")))?;

        Ok(parsed
            .data
            .into_iter()
            .map(|d| normalize(d.embedding))
            .collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.query_cache {
            if let Some(cached) = cache.get(text) {
                return Ok(cached);
            }
        }

        let text = text.to_string();
        let embedding = self
            .retry_policy
            .run(|| {
                let text = text.clone();
                async move {
                    let mut batch = self.embed_batch_once(&[text]).await?;
                    batch.pop().ok_or_else(|| {
                        RagmcpError::Embedding("empty response from embedding API".to_string())
                    })
                }
            })
            .await?;

        if let Some(cache) = &self.query_cache {
            cache.put(text, embedding.clone());
        }
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let chunk = chunk.to_vec();
            let embeddings = self
                .retry_policy
                .run(|| {
                    let chunk = chunk.clone();
                    async move { self.embed_batch_once(&chunk).await }
                })
                .await?;
            all.extend(embeddings);
        }
        Ok(all)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rescales_to_unit_length() {
        let v = normalize(vec![3.0, 4.0]);
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_unchanged() {
        let v = normalize(vec![0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn embedder_caps_batch_size_at_two_thousand_forty_eight() {
        let embedder = OpenAiEmbedder::new(
            "key".to_string(),
            "text-embedding-3-small".to_string(),
            1536,
            5000,
        );
        assert_eq!(embedder.batch_size, 2048);
    }

    #[tokio::test]
    async fn embed_batch_of_empty_input_is_empty() {
        let embedder = OpenAiEmbedder::new(
            "key".to_string(),
            "text-embedding-3-small".to_string(),
            1536,
            100,
        );
        let result = embedder.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
