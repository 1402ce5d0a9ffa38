#![allow(dead_code)]

use std::sync::Arc;

use alexandria::api::middleware::RateLimiter;
use alexandria::api::{self, AppState};
use alexandria::db::Db;
use alexandria::embedding::simple::SimpleProvider;
use alexandria::encryption::Encryptor;
use alexandria::events::{MemoryBus, Publisher};
use alexandria::knowledge::store;
use alexandria::knowledge::types::CreateInput;
use alexandria::semantic::SemanticConfig;

/// Open a fresh in-memory database wrapped in the shared handle.
pub fn test_db() -> Db {
    alexandria::db::open_memory_db().unwrap()
}

/// Deterministic 384-dim embedding with a spike at position `seed`.
/// Distinct seeds produce orthogonal vectors.
pub fn spike(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; 384];
    v[seed % 384] = 1.0;
    v
}

/// A vector with high cosine similarity (~0.995) to `spike(seed)`.
pub fn near_spike(seed: usize) -> Vec<f32> {
    let mut v = spike(seed);
    v[(seed + 1) % 384] = 0.1;
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

/// Insert a public knowledge entry with an embedding. Returns its id.
pub fn insert_knowledge(db: &Db, content: &str, agent: &str, embedding: Vec<f32>) -> String {
    let mut conn = db.lock().unwrap();
    store::create(
        &mut conn,
        CreateInput {
            content: content.into(),
            source_agent: agent.into(),
            embedding: Some(embedding),
            ..Default::default()
        },
    )
    .unwrap()
    .id
}

/// Build an [`AppState`] over an in-memory database with the simple
/// embedding provider, a fresh Fernet key, and an in-process bus.
pub fn test_state(db: Db, bus: Arc<MemoryBus>) -> AppState {
    AppState {
        db,
        cipher: Arc::new(Encryptor::new(&Encryptor::generate_key()).unwrap()),
        embedder: Arc::new(SimpleProvider::new()),
        publisher: Publisher::new(bus),
        api_key: None,
        limiter: Arc::new(RateLimiter::new(100, 10, 5)),
        semantic: SemanticConfig::default(),
    }
}

/// Serve the full API router on an ephemeral port. Returns the base URL.
pub async fn spawn_server(state: AppState) -> String {
    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
