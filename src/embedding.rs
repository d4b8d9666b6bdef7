//! Embedding abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two concrete implementations:
//! - **[`HashEmbedder`]** — deterministic feature-hash vectors computed
//!   locally; no network, no model download. Suitable for tests and for
//!   development setups without an inference service.
//! - **[`RemoteEmbedder`]** — calls an HTTP embedding service's `/api/embed`
//!   endpoint with exponential-backoff retry.
//!
//! Also provides vector utilities for the SQLite-backed vector store:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB codecs
//!
//! Embedders are always constructed explicitly (via [`create_embedder`])
//! and injected into whichever component needs one; there is no shared
//! process-wide instance.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;

/// A service that turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Create the appropriate [`Embedder`] based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(config.dims))),
        "remote" => Ok(Box::new(RemoteEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Hash embedder ============

/// Deterministic local embedder: each whitespace token is hashed into a
/// bucket of the output vector, and the result is L2-normalized. Two texts
/// sharing many tokens land near each other, which is all the tests and
/// dev setups need.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| hash_embed(t, self.dims))
            .collect())
    }
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut vec = vec![0.0f32; dims];
    for token in text.to_lowercase().split_whitespace() {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize % dims;
        // Sign bit from another digest byte spreads tokens across both
        // directions, which keeps unrelated texts near-orthogonal.
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vec[bucket] += sign;
    }
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

// ============ Remote embedder ============

/// Embedder backed by an HTTP inference service.
///
/// Calls `POST {url}/api/embed` with `{"model": …, "input": […]}` and
/// expects `{"embeddings": [[…], …]}`. Transient failures (429, 5xx,
/// network errors) are retried with exponential backoff: 1s, 2s, 4s, …
/// capped at 2^5. Other client errors fail immediately.
pub struct RemoteEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    timeout: Duration,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for remote provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims: config.dims,
            url,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/api/embed", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embed_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "embedding service error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("embedding service error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "embedding service connection error ({}): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
    }
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embed response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid embed response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors; 0.0 for mismatched lengths or
/// zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed(&["rust queue worker".to_string()]).await.unwrap();
        let b = embedder.embed(&["rust queue worker".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_ordering() {
        let embedder = HashEmbedder::new(128);
        let vecs = embedder
            .embed(&[
                "the ingestion pipeline claims pending jobs".to_string(),
                "the ingestion pipeline claims pending documents".to_string(),
                "completely unrelated cooking recipe for soup".to_string(),
            ])
            .await
            .unwrap();
        let near = cosine_similarity(&vecs[0], &vecs[1]);
        let far = cosine_similarity(&vecs[0], &vecs[2]);
        assert!(near > far, "near={} far={}", near, far);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_parse_embed_response() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        let vecs = parse_embed_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_embed_response_missing_field() {
        let json = serde_json::json!({ "data": [] });
        assert!(parse_embed_response(&json).is_err());
    }
}
