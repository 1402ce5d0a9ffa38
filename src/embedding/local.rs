//! Embedding provider backed by the local sidecar service.
//!
//! The sidecar exposes `POST /embed` taking `{"texts": [...]}` and
//! returning `{"embeddings": [[...], ...]}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::{Result, VaultError};

/// HTTP client for the embedding sidecar.
pub struct LocalProvider {
    url: String,
    client: reqwest::Client,
}

impl LocalProvider {
    /// `url` is the sidecar base URL, e.g. `http://localhost:8501`.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SidecarRequest<'a> {
    texts: Vec<&'a str>,
}

#[derive(Deserialize)]
struct SidecarResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embed", self.url))
            .json(&SidecarRequest { texts: vec![text] })
            .send()
            .await
            .map_err(|e| VaultError::Embedding(format!("calling sidecar: {e}")))?;

        if !response.status().is_success() {
            return Err(VaultError::Embedding(format!(
                "sidecar returned {}",
                response.status()
            )));
        }

        let body: SidecarResponse = response
            .json()
            .await
            .map_err(|e| VaultError::Embedding(format!("parsing sidecar response: {e}")))?;

        body.embeddings
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::Embedding("sidecar returned no embeddings".into()))
    }

    fn model(&self) -> &str {
        "local"
    }
}
