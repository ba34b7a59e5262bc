//! Client for OpenAI-compatible `/embeddings` endpoints.
//!
//! Works against the hosted API as well as self-hosted servers (TEI, vLLM,
//! Ollama) serving e5-style models.

use crate::config::EmbeddingConfig;
use crate::embeddings::{check_shape, EmbedRequest, Embedder};
use crate::types::error::{NewsIndexError, Result};
use crate::types::EmbeddingMatrix;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

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
    embedding: Vec<f32>,
    index: usize,
}

/// HTTP embedding provider.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Create a client for `{base_url}/embeddings`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `model` - Model name, e.g. `intfloat/multilingual-e5-large`
    /// * `api_key` - Bearer token, if the endpoint needs one
    /// * `dimensions` - Expected embedding width
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::Config` if the model name is empty or the key
    /// is not a valid header value
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>, dimensions: usize) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(NewsIndexError::Config("missing embedding model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let auth = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| NewsIndexError::Config("invalid embedding API key".to_string()))?;
            headers.insert(AUTHORIZATION, auth);
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| NewsIndexError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
        })
    }

    /// Create from configuration, reading the key from `api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self::new(&config.base_url, &config.model, api_key.as_deref(), config.dimensions)
    }

    async fn call_api(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| NewsIndexError::encoding(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(NewsIndexError::encoding(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| NewsIndexError::encoding(format!("malformed embedding response: {}", e)))?;
        Ok(into_ordered_rows(parsed))
    }
}

fn into_ordered_rows(mut response: EmbeddingResponse) -> Vec<Vec<f32>> {
    response.data.sort_by_key(|entry| entry.index);
    response.data.into_iter().map(|entry| entry.embedding).collect()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, request: EmbedRequest<'_>) -> Result<EmbeddingMatrix> {
        if request.texts.is_empty() {
            return Ok(EmbeddingMatrix::with_cols(self.dimensions));
        }

        let input = request.prefixed_texts();
        debug!(model = %self.model, texts = input.len(), "requesting embeddings");
        let rows = self.call_api(&input).await?;

        if rows.len() != input.len() {
            return Err(NewsIndexError::encoding(format!(
                "model returned {} embeddings for {} texts",
                rows.len(),
                input.len()
            )));
        }
        let mut matrix = EmbeddingMatrix::from_rows(rows)
            .map_err(|e| NewsIndexError::encoding(e.to_string()))?;
        check_shape(&matrix, input.len(), self.dimensions)?;

        if request.normalize {
            matrix.normalize_rows();
        }
        Ok(matrix)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_reordered_by_index() {
        let body = r#"{"data": [
            {"embedding": [0.0, 1.0], "index": 1},
            {"embedding": [1.0, 0.0], "index": 0}
        ]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(into_ordered_rows(parsed), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_endpoint_and_validation() {
        let embedder = HttpEmbedder::new("http://localhost:8080/v1/", "e5", None, 1024).unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.dimensions(), 1024);

        assert!(matches!(
            HttpEmbedder::new("http://localhost", " ", None, 8),
            Err(NewsIndexError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_request_skips_network() {
        let embedder = HttpEmbedder::new("http://127.0.0.1:9", "e5", None, 4).unwrap();
        let prompts = crate::embeddings::PromptConvention::default();
        let matrix = embedder.embed(prompts.query(&[])).await.unwrap();
        assert!(matrix.is_empty());
        assert_eq!(matrix.cols(), 4);
    }
}
