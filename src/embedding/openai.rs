//! OpenAI embeddings API provider.
//!
//! Requests 384 dimensions so vectors are interchangeable with the local
//! model's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{Result, VaultError};

const API_URL: &str = "https://api.openai.com/v1/embeddings";

/// OpenAI embeddings client.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        let model = if model.is_empty() {
            "text-embedding-3-small"
        } else {
            model
        };
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a str,
    model: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                input: text,
                model: &self.model,
                dimensions: EMBEDDING_DIM,
            })
            .send()
            .await
            .map_err(|e| VaultError::Embedding(format!("calling OpenAI: {e}")))?;

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| VaultError::Embedding(format!("parsing OpenAI response: {e}")))?;

        if let Some(error) = body.error {
            return Err(VaultError::Embedding(format!("OpenAI error: {}", error.message)));
        }

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| VaultError::Embedding("no embeddings returned".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
