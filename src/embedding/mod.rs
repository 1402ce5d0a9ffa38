//! Text-to-vector embedding providers.
//!
//! Every provider produces L2-normalized vectors of exactly
//! [`crate::db::EMBEDDING_DIM`] dimensions. Three backends exist:
//!
//! - [`simple`] — deterministic keyword hashing, no external calls
//! - [`local`] — HTTP client for the embedding sidecar service
//! - [`openai`] — OpenAI embeddings API, requesting 384 dimensions

pub mod local;
pub mod openai;
pub mod simple;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{Result, VaultError};

pub use crate::db::EMBEDDING_DIM;

/// A text embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Provider/model identifier for logging and fingerprinting.
    fn model(&self) -> &str;

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create an embedding provider from config.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.backend.as_str() {
        "simple" => Ok(Arc::new(simple::SimpleProvider::new())),
        "local" => Ok(Arc::new(local::LocalProvider::new(&config.sidecar_url))),
        "openai" => {
            if config.openai_api_key.is_empty() {
                return Err(VaultError::Validation(
                    "OPENAI_API_KEY is required for the openai embedding backend".into(),
                ));
            }
            Ok(Arc::new(openai::OpenAiProvider::new(
                &config.openai_api_key,
                &config.openai_model,
            )))
        }
        other => Err(VaultError::Validation(format!(
            "unknown embedding backend: {other}. Supported: simple, local, openai"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_builds_known_backends() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(create_provider(&config).unwrap().model(), "simple");

        config.backend = "local".into();
        assert_eq!(create_provider(&config).unwrap().model(), "local");

        config.backend = "openai".into();
        assert!(create_provider(&config).is_err());
        config.openai_api_key = "sk-test".into();
        assert_eq!(
            create_provider(&config).unwrap().model(),
            "text-embedding-3-small"
        );

        config.backend = "bogus".into();
        assert!(create_provider(&config).is_err());
    }
}
