//! Service wiring and lifecycle.
//!
//! Builds the dependency graph once at startup — database, cipher,
//! embedding provider, bus, publisher, subscriber, semantic worker — then
//! serves the HTTP API until ctrl-c. Shutdown flips the root watch channel,
//! and background tasks get a bounded grace period to finish.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::api::{self, middleware::RateLimiter, AppState};
use crate::config::AlexandriaConfig;
use crate::db::{self, Db};
use crate::embedding;
use crate::encryption::Encryptor;
use crate::events::{MemoryBus, Publisher, Subscriber};
use crate::semantic::Worker;

/// How long in-flight background work may run after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Start the vault service and run until interrupted.
pub async fn serve(config: AlexandriaConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;

    // Warn when the configured embedding backend differs from the one the
    // stored vectors were produced with.
    if let Ok(Some(stored)) = db::migrations::get_embedding_model(&conn) {
        if stored != config.embedding.backend {
            tracing::warn!(
                stored = %stored,
                configured = %config.embedding.backend,
                "embedding backend changed; existing vectors were built with the old one"
            );
        }
    }
    let _ = db::migrations::set_embedding_model(&conn, &config.embedding.backend);

    let db: Db = Arc::new(Mutex::new(conn));

    let embedder = embedding::create_provider(&config.embedding)
        .context("building embedding provider")?;
    tracing::info!(backend = embedder.model(), "embedding provider ready");

    // A malformed key is fatal; a missing key degrades to an ephemeral one
    // so the rest of the vault still serves (secrets will not survive a
    // restart).
    let key = config.resolved_encryption_key();
    let cipher = if key.is_empty() {
        tracing::warn!("no encryption key configured, generating an ephemeral one");
        Encryptor::new(&Encryptor::generate_key())?
    } else {
        Encryptor::new(&key).context("loading encryption key")?
    };

    let bus = MemoryBus::new();
    let publisher = Publisher::new(bus.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let subscriber = Subscriber::new(db.clone(), embedder.clone(), publisher.clone());
    tasks.extend(
        subscriber
            .start(bus.as_ref(), shutdown_rx.clone())
            .await
            .context("starting event subscriber")?,
    );

    let semantic_config = config.semantic_config();
    if semantic_config.enabled {
        let worker = Worker::new(db.clone(), embedder.clone(), semantic_config.clone());
        tasks.extend(worker.start(&shutdown_rx));
    } else {
        tracing::info!("semantic worker disabled");
    }

    let state = AppState {
        db,
        cipher: Arc::new(cipher),
        embedder,
        publisher,
        api_key: (!config.server.api_key.is_empty()).then(|| config.server.api_key.clone()),
        limiter: Arc::new(RateLimiter::new(
            config.rate_limits.knowledge_per_minute,
            config.rate_limits.secret_per_minute,
            config.rate_limits.briefing_per_minute,
        )),
        semantic: semantic_config,
    };
    let router = api::router(state);

    let addr = ("0.0.0.0", config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding port {}", config.server.port))?;
    tracing::info!(port = config.server.port, "vault listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Flip the root token and give background tasks a bounded window.
    let _ = shutdown_tx.send(true);
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    for task in tasks {
        if tokio::time::timeout_at(deadline, task).await.is_err() {
            tracing::warn!("background task did not stop within the grace period");
        }
    }
    tracing::info!("vault shut down");
    Ok(())
}
