//! Service configuration.
//!
//! Loaded from a TOML file (`~/.alexandria/config.toml` by default) with
//! environment variable overrides on top, so containerised deployments can
//! run config-file-free.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::semantic::SemanticConfig;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AlexandriaConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub encryption: EncryptionConfig,
    pub events: EventsConfig,
    pub embedding: EmbeddingConfig,
    pub rate_limits: RateLimitConfig,
    pub semantic: SemanticSection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: String,
    /// Required on mutating requests when set.
    pub api_key: String,
    /// Reserved for JWT verification of agent identity.
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EncryptionConfig {
    /// URL-safe base64 32-byte Fernet key.
    pub key: String,
    /// File to read the key from when `key` is unset.
    pub key_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EventsConfig {
    /// Bus endpoint for an external broker adapter.
    pub bus_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// One of `simple`, `local`, `openai`.
    pub backend: String,
    pub openai_model: String,
    pub openai_api_key: String,
    pub sidecar_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per minute on /knowledge routes.
    pub knowledge_per_minute: u32,
    /// Requests per minute on /secrets routes.
    pub secret_per_minute: u32,
    /// Requests per minute on /briefings and /context routes.
    pub briefing_per_minute: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SemanticSection {
    pub enabled: bool,
    pub edge_threshold: f64,
    pub cluster_join_threshold: f64,
    pub auto_merge_threshold: f64,
    pub merge_proposal_threshold: f64,
    pub embed_interval_secs: u64,
    pub scan_interval_secs: u64,
    pub cluster_interval_secs: u64,
    pub embed_batch_size: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8500,
            log_level: "info".into(),
            api_key: String::new(),
            jwt_secret: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_data_dir()
            .join("vault.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            key_path: "/run/secrets/vault_encryption_key".into(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            bus_url: "nats://localhost:4222".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "simple".into(),
            openai_model: "text-embedding-3-small".into(),
            openai_api_key: String::new(),
            sidecar_url: "http://localhost:8501".into(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            knowledge_per_minute: 100,
            secret_per_minute: 10,
            briefing_per_minute: 5,
        }
    }
}

impl Default for SemanticSection {
    fn default() -> Self {
        let defaults = SemanticConfig::default();
        Self {
            enabled: defaults.enabled,
            edge_threshold: defaults.edge_threshold,
            cluster_join_threshold: defaults.cluster_join_threshold,
            auto_merge_threshold: defaults.auto_merge_threshold,
            merge_proposal_threshold: defaults.merge_proposal_threshold,
            embed_interval_secs: defaults.embed_interval.as_secs(),
            scan_interval_secs: defaults.scan_interval.as_secs(),
            cluster_interval_secs: defaults.cluster_interval.as_secs(),
            embed_batch_size: defaults.embed_batch_size,
        }
    }
}

/// Returns `~/.alexandria/`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".alexandria")
}

/// Returns the default config file path: `~/.alexandria/config.toml`.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl AlexandriaConfig {
    /// Load config from the default TOML file then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            AlexandriaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        env_str("ALEXANDRIA_DB", &mut self.storage.db_path);
        env_str("ALEXANDRIA_LOG_LEVEL", &mut self.server.log_level);
        env_str("ALEXANDRIA_API_KEY", &mut self.server.api_key);
        env_str("JWT_SECRET", &mut self.server.jwt_secret);
        env_parse("ALEXANDRIA_PORT", &mut self.server.port);

        env_str("ENCRYPTION_KEY", &mut self.encryption.key);
        env_str("ENCRYPTION_KEY_PATH", &mut self.encryption.key_path);
        env_str("NATS_URL", &mut self.events.bus_url);

        env_str("EMBEDDING_BACKEND", &mut self.embedding.backend);
        env_str("OPENAI_API_KEY", &mut self.embedding.openai_api_key);
        env_str("OPENAI_EMBEDDING_MODEL", &mut self.embedding.openai_model);
        env_str("EMBEDDING_SIDECAR_URL", &mut self.embedding.sidecar_url);

        env_parse("KNOWLEDGE_RATE_LIMIT", &mut self.rate_limits.knowledge_per_minute);
        env_parse("SECRET_RATE_LIMIT", &mut self.rate_limits.secret_per_minute);
        env_parse("BRIEFING_RATE_LIMIT", &mut self.rate_limits.briefing_per_minute);

        if let Ok(v) = std::env::var("SEMANTIC_ENABLED") {
            self.semantic.enabled = v == "true" || v == "1";
        }
        env_parse("SEMANTIC_EDGE_THRESHOLD", &mut self.semantic.edge_threshold);
        env_parse(
            "SEMANTIC_CLUSTER_THRESHOLD",
            &mut self.semantic.cluster_join_threshold,
        );
        env_parse(
            "SEMANTIC_AUTO_MERGE_THRESHOLD",
            &mut self.semantic.auto_merge_threshold,
        );
        env_parse(
            "SEMANTIC_MERGE_PROPOSAL_THRESHOLD",
            &mut self.semantic.merge_proposal_threshold,
        );
        env_parse(
            "SEMANTIC_EMBED_INTERVAL",
            &mut self.semantic.embed_interval_secs,
        );
        env_parse("SEMANTIC_SCAN_INTERVAL", &mut self.semantic.scan_interval_secs);
        env_parse(
            "SEMANTIC_CLUSTER_INTERVAL",
            &mut self.semantic.cluster_interval_secs,
        );
        env_parse(
            "SEMANTIC_EMBED_BATCH_SIZE",
            &mut self.semantic.embed_batch_size,
        );
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// The encryption key: config/env value, or the contents of the key
    /// file. Empty when neither is available.
    pub fn resolved_encryption_key(&self) -> String {
        if !self.encryption.key.is_empty() {
            return self.encryption.key.trim().to_string();
        }
        std::fs::read_to_string(&self.encryption.key_path)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// The semantic worker config derived from this section.
    pub fn semantic_config(&self) -> SemanticConfig {
        SemanticConfig {
            enabled: self.semantic.enabled,
            edge_threshold: self.semantic.edge_threshold,
            cluster_join_threshold: self.semantic.cluster_join_threshold,
            auto_merge_threshold: self.semantic.auto_merge_threshold,
            merge_proposal_threshold: self.semantic.merge_proposal_threshold,
            embed_interval: Duration::from_secs(self.semantic.embed_interval_secs),
            scan_interval: Duration::from_secs(self.semantic.scan_interval_secs),
            cluster_interval: Duration::from_secs(self.semantic.cluster_interval_secs),
            embed_batch_size: self.semantic.embed_batch_size,
        }
    }
}

fn env_str(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
