use std::time::Instant;

use reqwest::Client as HttpClient;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Text embedding collaborator
///
/// The model invocation is opaque to the pipeline; only the narrow
/// text-to-vector contract matters here. Empty or whitespace-only input
/// yields the zero vector by convention.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
}

/// Embedder backed by a text-embeddings-inference sidecar
///
/// The sidecar serves all-MiniLM-L6-v2 over `POST /embed` and returns one
/// 384-dim vector per input.
pub struct HttpEmbedder {
    http_client: HttpClient,
    base_url: String,
    dim: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a str,
}

impl HttpEmbedder {
    pub fn new(base_url: String, dim: usize) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url,
            dim,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dim]);
        }

        let start = Instant::now();
        let url = format!("{}/embed", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&EmbedRequest { inputs: text })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "Embedding endpoint returned status {}: {}",
                status, body
            )));
        }

        let mut vectors: Vec<Vec<f32>> = response.json().await?;
        let vector = if vectors.is_empty() {
            return Err(AppError::Embedding(
                "Embedding endpoint returned no vectors".to_string(),
            ));
        } else {
            vectors.swap_remove(0)
        };

        if vector.len() != self.dim {
            return Err(AppError::Embedding(format!(
                "Expected {}-dim embedding, got {}",
                self.dim,
                vector.len()
            )));
        }

        // Target is well under the request budget; log, never retry
        let elapsed = start.elapsed().as_millis();
        if elapsed > 100 {
            tracing::warn!(elapsed_ms = elapsed, "Slow embedding call");
        }

        Ok(vector)
    }
}
