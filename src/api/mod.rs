//! HTTP surface: axum router, response envelope, and shared state.
//!
//! Responses use the envelope `{"data": ..., "meta": {"timestamp"}}`;
//! errors use `{"error": {"code", "message"}, "meta": {"timestamp"}}`.
//! Callers identify themselves with `X-Agent-ID`; mutating routes may
//! additionally require `X-API-Key`.

pub mod access;
pub mod briefings;
pub mod error;
pub mod graph;
pub mod health;
pub mod identity;
pub mod knowledge;
pub mod middleware;
pub mod secrets;
pub mod semantic;

use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::db::{self, Db};
use crate::embedding::EmbeddingProvider;
use crate::encryption::Encryptor;
use crate::error::VaultError;
use crate::events::Publisher;
use crate::semantic::SemanticConfig;

/// Everything the handlers need, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cipher: Arc<Encryptor>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub publisher: Publisher,
    pub api_key: Option<String>,
    pub limiter: Arc<middleware::RateLimiter>,
    pub semantic: SemanticConfig,
}

/// Lock the shared connection for a handler's synchronous store work.
pub(crate) fn lock_db(db: &Mutex<rusqlite::Connection>) -> ApiResult<MutexGuard<'_, rusqlite::Connection>> {
    db.lock()
        .map_err(|_| ApiError(VaultError::Internal("db lock poisoned".into())))
}

/// Wrap a payload in the success envelope.
pub(crate) fn success(status: StatusCode, data: impl serde::Serialize) -> Response {
    (
        status,
        Json(json!({"data": data, "meta": {"timestamp": db::now()}})),
    )
        .into_response()
}

/// JSON body extractor whose rejection carries the VALIDATION_ERROR
/// envelope instead of axum's plain-text default.
pub struct Body<T>(pub T);

impl<S, T> FromRequest<S> for Body<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Body(value)),
            Err(rejection) => Err(ApiError(VaultError::Validation(format!(
                "invalid request body: {rejection}"
            )))),
        }
    }
}

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    let knowledge_routes = Router::new()
        .route("/knowledge", post(knowledge::create).get(knowledge::list))
        .route("/knowledge/search", post(knowledge::search))
        .route("/knowledge/batch", post(knowledge::batch_create))
        .route(
            "/knowledge/{id}",
            get(knowledge::get_one)
                .put(knowledge::update)
                .delete(knowledge::delete),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::limit_knowledge,
        ));

    let secret_routes = Router::new()
        .route("/secrets", post(secrets::create).get(secrets::list))
        .route(
            "/secrets/{name}",
            get(secrets::get_one)
                .put(secrets::update)
                .delete(secrets::delete),
        )
        .route("/secrets/{name}/rotate", post(secrets::rotate))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::limit_secrets,
        ));

    let briefing_routes = Router::new()
        .route("/briefings/{agent_id}", get(briefings::briefing))
        .route("/context/{agent_id}", get(briefings::context))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::limit_briefings,
        ));

    let graph_routes = Router::new()
        .route("/graph/entities", post(graph::create_entity).get(graph::list_entities))
        .route(
            "/graph/entities/{id}",
            get(graph::get_entity)
                .put(graph::update_entity)
                .delete(graph::delete_entity),
        )
        .route("/graph/entities/{id}/related", get(graph::related_entities))
        .route("/graph/entities/{id}/relationships", get(graph::entity_relationships))
        .route("/graph/relationships", post(graph::create_relationship))
        .route(
            "/graph/relationships/{id}",
            get(graph::get_relationship).delete(graph::delete_relationship),
        );

    let identity_routes = Router::new()
        .route("/identity/resolve", post(identity::resolve))
        .route("/identity/merge", post(identity::merge))
        .route("/identity/pending", get(identity::pending))
        .route("/identity/aliases/{id}/review", post(identity::review_alias))
        .route("/identity/entities/{id}", get(identity::get_entity));

    let semantic_routes = Router::new()
        .route("/semantic/status", get(semantic::status))
        .route("/semantic/clusters", get(semantic::list_clusters))
        .route("/semantic/clusters/{id}/members", get(semantic::cluster_members))
        .route("/semantic/entities/{id}/clusters", get(semantic::entity_clusters))
        .route("/semantic/similar/{id}", get(semantic::similar))
        .route("/semantic/proposals", get(semantic::proposals))
        .route("/semantic/proposals/{id}/review", post(semantic::review_proposal));

    let access_routes = Router::new()
        .route("/people", post(access::create_person).get(access::list_people))
        .route(
            "/people/{id}",
            get(access::get_person)
                .put(access::update_person)
                .delete(access::delete_person),
        )
        .route("/devices", post(access::create_device).get(access::list_devices))
        .route(
            "/devices/{id}",
            get(access::get_device).delete(access::delete_device),
        )
        .route("/grants", post(access::create_grant).get(access::list_grants))
        .route("/grants/check", get(access::check_grant))
        .route(
            "/grants/{id}",
            get(access::get_grant).delete(access::delete_grant),
        );

    Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(health::stats))
        .merge(knowledge_routes)
        .merge(secret_routes)
        .merge(briefing_routes)
        .merge(graph_routes)
        .merge(identity_routes)
        .merge(semantic_routes)
        .merge(access_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ))
        .with_state(state)
}
