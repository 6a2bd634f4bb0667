//! Embedding provider seam and the OpenAI-compatible HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::document::Vector;
use crate::error::{RagError, Result};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, same length and order. A failure applies
    /// to the whole batch.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>>;

    async fn embed_query(&self, text: &str) -> Result<Vector> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::provider("no embedding returned for query"))
    }

    /// Model identifier the vectors belong to.
    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbeddingProvider {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::Config("OPENAI_API_KEY is not set".into()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(OpenAiEmbeddingProvider {
            api_key,
            model: model.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    async fn call_api(&self, input: &[String]) -> Result<Vec<Vector>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::provider(format!("request timed out: {}", e))
                } else {
                    RagError::provider(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RagError::provider(format!("HTTP {}: {}", status, snippet.trim())));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::provider(format!("malformed response: {}", e)))?;

        order_embeddings(parsed.data, input.len())
    }
}

/// Puts vectors back in request order and checks the count.
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vector>> {
    if data.len() != expected {
        return Err(RagError::provider(format!(
            "expected {} embeddings, received {}",
            expected,
            data.len()
        )));
    }
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.call_api(texts).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_missing_api_key() {
        let result = OpenAiEmbeddingProvider::new(
            "  ",
            "text-embedding-3-small",
            "http://localhost",
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(RagError::Config(_))));
    }

    #[test]
    fn test_order_embeddings_by_index() {
        let data: Vec<EmbeddingData> = serde_json::from_str(
            r#"[{"index": 1, "embedding": [2.0]}, {"index": 0, "embedding": [1.0]}]"#,
        )
        .unwrap();
        let vectors = order_embeddings(data, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_embeddings_count_mismatch() {
        let data: Vec<EmbeddingData> =
            serde_json::from_str(r#"[{"embedding": [1.0]}]"#).unwrap();
        assert!(matches!(
            order_embeddings(data, 2),
            Err(RagError::EmbeddingProvider(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_provider_error() {
        let provider = OpenAiEmbeddingProvider::new(
            "key",
            "text-embedding-3-small",
            "http://127.0.0.1:9/v1/embeddings",
            Duration::from_millis(500),
        )
        .unwrap();

        let err = provider.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingProvider(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let provider = OpenAiEmbeddingProvider::new(
            "key",
            "m",
            "http://127.0.0.1:9/v1/embeddings",
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(provider.embed_documents(&[]).await.unwrap().is_empty());
    }
}
