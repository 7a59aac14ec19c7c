//! Embedding Client: maps text to a fixed-dimension unit vector.
//!
//! The model itself is an external collaborator (§1); this module defines
//! the trait boundary and an HTTP implementation that POSTs to a configured
//! embedding service, the way the teacher's provider traits (`llm/provider.rs`)
//! wrap a remote model behind a common interface.

use crate::error::{EmbedError, Error, Result};
use crate::model::VECTOR_DIM;
use crate::vector_store::l2_normalize;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Abstracts over the embedding provider.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP-backed embedding client. Vectors are L2-normalized on receipt to
/// satisfy the data model's unit-vector invariant (§3).
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    url: String,
}

impl HttpEmbeddingClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Embed(EmbedError::Timeout)
                } else {
                    Error::Embed(EmbedError::RequestFailed(e.to_string()))
                }
            })?;
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embed(EmbedError::RequestFailed(e.to_string())))?;
        if parsed.embedding.len() != VECTOR_DIM {
            return Err(Error::Embed(EmbedError::InvalidDimension {
                expected: VECTOR_DIM,
                actual: parsed.embedding.len(),
            }));
        }
        let mut vector = parsed.embedding;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Deterministic in-process embedding client for tests and local
/// development: hashes tokens into a fixed-dimension bag-of-words vector.
/// Not a semantic model — only useful where exact similarity values don't
/// matter, such as wiring tests for the publish pipeline's embed stage.
pub struct HashEmbeddingClient {
    dim: usize,
}

impl HashEmbeddingClient {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.split_whitespace() {
            let hash = xxhash_rust::xxh64::xxh64(token.as_bytes(), 0);
            let idx = (hash as usize) % self.dim;
            vector[idx] += 1.0;
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedding_is_unit_length() {
        let client = HashEmbeddingClient::new(16);
        let v = client.embed("the device has a battery").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hash_embedding_deterministic() {
        let client = HashEmbeddingClient::new(32);
        let a = client.embed("same text").await.unwrap();
        let b = client.embed("same text").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedding_differs_for_different_text() {
        let client = HashEmbeddingClient::new(32);
        let a = client.embed("battery capacity").await.unwrap();
        let b = client.embed("shipping date").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_http_client_l2_normalizes_and_validates_dimension() {
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let raw = vec![3.0f32; VECTOR_DIM];
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": raw })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(format!("{}/embed", server.uri()), Duration::from_secs(5)).unwrap();
        let vector = client.embed("some passage").await.unwrap();
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_http_client_rejects_wrong_dimension() {
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.1, 0.2] })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(format!("{}/embed", server.uri()), Duration::from_secs(5)).unwrap();
        let err = client.embed("some passage").await.unwrap_err();
        assert!(matches!(err, Error::Embed(EmbedError::InvalidDimension { .. })));
    }
}
