//! Background semantic worker.
//!
//! Three independent periodic loops maintain the semantic overlay:
//!
//! - **Embedder** ([`embedder`], default 30 s) — computes embeddings for
//!   entities that have none or whose text changed
//! - **Similarity scanner** ([`scanner`], default 5 min) — upserts
//!   `semantic_similarity` edges between nearby entities
//! - **Cluster detector** ([`clusterer`], default 15 min) — assigns
//!   entities to clusters, recomputes centroids, merges or proposes merges
//!   of converging clusters
//!
//! Loops run in order E → S → C at startup but never block each other;
//! each takes its own view of the store. All three are idempotent: re-running
//! against unchanged data writes nothing new.

pub mod clusterer;
pub mod embedder;
pub mod scanner;
pub mod text;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::Db;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// Semantic worker tuning. Defaults match the deployed thresholds.
#[derive(Debug, Clone)]
pub struct SemanticConfig {
    pub enabled: bool,
    /// Minimum similarity to create an auto-edge.
    pub edge_threshold: f64,
    /// Minimum similarity to join an existing cluster.
    pub cluster_join_threshold: f64,
    /// Clusters above this centroid similarity merge automatically.
    pub auto_merge_threshold: f64,
    /// Clusters above this centroid similarity get a pending proposal.
    pub merge_proposal_threshold: f64,
    pub embed_interval: Duration,
    pub scan_interval: Duration,
    pub cluster_interval: Duration,
    pub embed_batch_size: i64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            edge_threshold: 0.75,
            cluster_join_threshold: 0.70,
            auto_merge_threshold: 0.95,
            merge_proposal_threshold: 0.85,
            embed_interval: Duration::from_secs(30),
            scan_interval: Duration::from_secs(300),
            cluster_interval: Duration::from_secs(900),
            embed_batch_size: 50,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Loop {
    Embed,
    Scan,
    Cluster,
}

impl Loop {
    fn name(&self) -> &'static str {
        match self {
            Self::Embed => "embedder",
            Self::Scan => "similarity-scanner",
            Self::Cluster => "cluster-detector",
        }
    }
}

/// The semantic worker. Holds no state outside the database between
/// iterations.
pub struct Worker {
    pub(crate) db: Db,
    pub(crate) provider: Arc<dyn EmbeddingProvider>,
    pub(crate) config: SemanticConfig,
}

impl Worker {
    pub fn new(db: Db, provider: Arc<dyn EmbeddingProvider>, config: SemanticConfig) -> Arc<Self> {
        Arc::new(Self {
            db,
            provider,
            config,
        })
    }

    /// Launch the three loops. They run until the shutdown channel flips.
    pub fn start(self: &Arc<Self>, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        tracing::info!("semantic worker starting");
        [
            (Loop::Embed, self.config.embed_interval),
            (Loop::Scan, self.config.scan_interval),
            (Loop::Cluster, self.config.cluster_interval),
        ]
        .into_iter()
        .map(|(kind, interval)| {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run_loop(kind, interval, shutdown).await })
        })
        .collect()
    }

    async fn run_loop(
        self: Arc<Self>,
        kind: Loop,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(worker = kind.name(), "semantic loop shutting down");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once(kind).await {
                        tracing::warn!(worker = kind.name(), %err, "semantic loop error");
                    }
                }
            }
        }
    }

    async fn run_once(&self, kind: Loop) -> Result<()> {
        match kind {
            Loop::Embed => self.embed_batch().await,
            Loop::Scan => self.scan_similarity(),
            Loop::Cluster => self.detect_clusters(),
        }
    }
}
