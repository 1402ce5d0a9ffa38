//! Knowledge endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AgentId;
use crate::api::{lock_db, success, AppState, Body};
use crate::audit::{self, Action};
use crate::error::VaultError;
use crate::knowledge::store;
use crate::knowledge::types::{
    Category, CreateInput, Decay, Filter, Scope, SearchInput, UpdateInput,
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub shared_with: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub relevance_decay: Option<Decay>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

async fn create_entry(
    state: &AppState,
    agent_id: &str,
    request: CreateRequest,
) -> ApiResult<crate::knowledge::types::KnowledgeEntry> {
    if request.content.is_empty() {
        return Err(ApiError::validation("content is required"));
    }

    // Embedding failures do not fail the write; the entry is stored
    // without a vector and excluded from similarity search.
    let embedding = match state.embedder.embed(&request.content).await {
        Ok(embedding) => Some(embedding),
        Err(err) => {
            tracing::warn!(%err, "embedding failed, storing entry without vector");
            None
        }
    };

    let entry = {
        let mut conn = lock_db(&state.db)?;
        let entry = store::create(
            &mut conn,
            CreateInput {
                content: request.content,
                summary: request.summary,
                source_agent: agent_id.to_string(),
                category: request.category,
                scope: request.scope,
                shared_with: request.shared_with,
                tags: request.tags,
                embedding,
                metadata: request.metadata,
                confidence: request.confidence,
                relevance_decay: request.relevance_decay,
                expires_at: request.expires_at,
                ..Default::default()
            },
        )?;
        audit::log_best_effort(&conn, Action::KnowledgeWrite, agent_id, Some(&entry.id), true);
        entry
    };

    state.publisher.knowledge_created(&entry).await;
    Ok(entry)
}

/// POST /knowledge
pub async fn create(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(request): Body<CreateRequest>,
) -> ApiResult<Response> {
    let entry = create_entry(&state, &agent_id, request).await?;
    Ok(success(StatusCode::CREATED, entry))
}

/// POST /knowledge/batch — up to 100 entries in one request.
pub async fn batch_create(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(requests): Body<Vec<CreateRequest>>,
) -> ApiResult<Response> {
    if requests.is_empty() {
        return Err(ApiError::validation("batch cannot be empty"));
    }
    if requests.len() > 100 {
        return Err(ApiError::validation("batch exceeds 100 entries"));
    }

    let mut created = Vec::with_capacity(requests.len());
    for request in requests {
        created.push(create_entry(&state, &agent_id, request).await?);
    }
    Ok(success(
        StatusCode::CREATED,
        json!({"created": created.len(), "entries": created}),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub source_agent: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// GET /knowledge
pub async fn list(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Query(params): Query<ListParams>,
) -> ApiResult<Response> {
    let category = params
        .category
        .as_deref()
        .map(str::parse::<Category>)
        .transpose()
        .map_err(ApiError::validation)?;
    let scope = params
        .scope
        .as_deref()
        .map(str::parse::<Scope>)
        .transpose()
        .map_err(ApiError::validation)?;

    let filter = Filter {
        category,
        scope,
        source_agent: params.source_agent,
        tags: params.tag.map(|t| vec![t]).unwrap_or_default(),
        agent_id,
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    };

    let conn = lock_db(&state.db)?;
    let entries = store::list(&conn, &filter)?;
    Ok(success(StatusCode::OK, entries))
}

/// GET /knowledge/{id}
pub async fn get_one(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let entry = store::get(&conn, &id, &agent_id)?.ok_or(VaultError::NotFound("knowledge"))?;
    audit::log_best_effort(&conn, Action::KnowledgeRead, &agent_id, Some(&id), true);
    Ok(success(StatusCode::OK, entry))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub shared_with: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub relevance_decay: Option<Decay>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub superseded_by: Option<String>,
}

/// PUT /knowledge/{id} — owner or admin only. A content change re-embeds.
pub async fn update(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(id): Path<String>,
    Body(request): Body<UpdateRequest>,
) -> ApiResult<Response> {
    let embedding = match &request.content {
        Some(content) => match state.embedder.embed(content).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                tracing::warn!(%err, "re-embedding failed, keeping previous vector");
                None
            }
        },
        None => None,
    };

    let entry = {
        let mut conn = lock_db(&state.db)?;
        let entry = store::update(
            &mut conn,
            &id,
            &agent_id,
            UpdateInput {
                content: request.content,
                summary: request.summary,
                category: request.category,
                scope: request.scope,
                shared_with: request.shared_with,
                tags: request.tags,
                embedding,
                metadata: request.metadata,
                confidence: request.confidence,
                relevance_decay: request.relevance_decay,
                expires_at: request.expires_at,
                superseded_by: request.superseded_by,
            },
        )?;
        audit::log_best_effort(&conn, Action::KnowledgeWrite, &agent_id, Some(&id), true);
        entry
    };

    state.publisher.knowledge_updated(&entry).await;
    Ok(success(StatusCode::OK, entry))
}

/// DELETE /knowledge/{id} — soft delete, owner or admin only.
pub async fn delete(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let mut conn = lock_db(&state.db)?;
    store::delete(&mut conn, &id, &agent_id)?;
    audit::log_best_effort(&conn, Action::KnowledgeDelete, &agent_id, Some(&id), true);
    Ok(success(StatusCode::OK, json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub min_relevance: Option<f64>,
    #[serde(default)]
    pub include_expired: bool,
}

/// POST /knowledge/search — semantic search. Unlike writes, a failed
/// query embedding fails the request: there is nothing to rank without it.
pub async fn search(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(request): Body<SearchRequest>,
) -> ApiResult<Response> {
    if request.query.is_empty() {
        return Err(ApiError::validation("query is required"));
    }

    let query_embedding = state
        .embedder
        .embed(&request.query)
        .await
        .map_err(|e| ApiError(VaultError::Embedding(e.to_string())))?;

    let results = {
        let conn = lock_db(&state.db)?;
        let results = crate::knowledge::search::search(
            &conn,
            &SearchInput {
                query_embedding,
                limit: request.limit.unwrap_or(10),
                scope: request.scope,
                categories: request.categories,
                agent_id: agent_id.clone(),
                min_relevance: request.min_relevance.unwrap_or(0.5),
                include_expired: request.include_expired,
            },
        )?;
        audit::log_best_effort(&conn, Action::KnowledgeSearch, &agent_id, None, true);
        results
    };

    let count = results.len();
    state.publisher.knowledge_searched(&agent_id, count).await;
    Ok(success(
        StatusCode::OK,
        json!({"results": results, "count": count}),
    ))
}
