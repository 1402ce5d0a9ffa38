//! Context graph endpoints.

use std::collections::HashSet;

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
use crate::graph::{edges, entities};

#[derive(Debug, Deserialize)]
pub struct CreateEntityRequest {
    pub entity_type: String,
    #[serde(default)]
    pub key: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// POST /graph/entities
pub async fn create_entity(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(request): Body<CreateEntityRequest>,
) -> ApiResult<Response> {
    if request.entity_type.is_empty() || request.display_name.is_empty() {
        return Err(ApiError::validation("entity_type and display_name are required"));
    }
    let key = request
        .key
        .unwrap_or_else(|| format!("{}:{}", request.entity_type, request.display_name));

    let conn = lock_db(&state.db)?;
    let entity = entities::create(
        &conn,
        entities::CreateInput {
            entity_type: request.entity_type,
            key,
            display_name: request.display_name,
            summary: request.summary.unwrap_or_default(),
            metadata: request.metadata,
        },
    )
    .map_err(|e| {
        if e.is_unique_violation() {
            ApiError(VaultError::Conflict("entity"))
        } else {
            ApiError(e)
        }
    })?;
    audit::log_best_effort(&conn, Action::GraphWrite, &agent_id, Some(&entity.id), true);
    Ok(success(StatusCode::CREATED, entity))
}

#[derive(Debug, Deserialize)]
pub struct ListEntitiesParams {
    #[serde(rename = "type", default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// GET /graph/entities
pub async fn list_entities(
    State(state): State<AppState>,
    Query(params): Query<ListEntitiesParams>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let entities = entities::list(
        &conn,
        params.entity_type.as_deref(),
        params.limit.unwrap_or(50),
        params.offset.unwrap_or(0),
    )?;
    Ok(success(StatusCode::OK, entities))
}

fn live_entity(conn: &rusqlite::Connection, id: &str) -> ApiResult<entities::Entity> {
    match entities::get(conn, id)? {
        Some(entity) if entity.is_live() => Ok(entity),
        _ => Err(ApiError(VaultError::NotFound("entity"))),
    }
}

/// GET /graph/entities/{id}
pub async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let entity = live_entity(&conn, &id)?;
    Ok(success(StatusCode::OK, entity))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEntityRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// PUT /graph/entities/{id}
pub async fn update_entity(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(id): Path<String>,
    Body(request): Body<UpdateEntityRequest>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let entity = entities::update(
        &conn,
        &id,
        request.display_name.as_deref(),
        request.summary.as_deref(),
        request.metadata.as_ref(),
    )?;
    audit::log_best_effort(&conn, Action::GraphWrite, &agent_id, Some(&id), true);
    Ok(success(StatusCode::OK, entity))
}

/// DELETE /graph/entities/{id} — soft delete.
pub async fn delete_entity(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    entities::soft_delete(&conn, &id)?;
    audit::log_best_effort(&conn, Action::GraphWrite, &agent_id, Some(&id), true);
    Ok(success(StatusCode::OK, json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct RelatedParams {
    #[serde(default)]
    pub depth: Option<usize>,
}

/// GET /graph/entities/{id}/related?depth=D — BFS over active edges in
/// both directions, collecting visited entities and every traversed edge.
pub async fn related_entities(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RelatedParams>,
) -> ApiResult<Response> {
    let depth = params.depth.unwrap_or(2).clamp(1, 3);

    let conn = lock_db(&state.db)?;
    live_entity(&conn, &id)?;

    let mut visited: HashSet<String> = HashSet::from([id.clone()]);
    let mut seen_edges: HashSet<String> = HashSet::new();
    let mut all_edges = Vec::new();
    let mut frontier = vec![id.clone()];

    for _ in 0..depth {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();
        for entity_id in &frontier {
            let mut connected = edges::edges_from(&conn, entity_id)?;
            connected.extend(edges::edges_to(&conn, entity_id)?);
            for edge in connected {
                let other = if edge.from_id == *entity_id {
                    edge.to_id.clone()
                } else {
                    edge.from_id.clone()
                };
                if seen_edges.insert(edge.id.clone()) {
                    all_edges.push(edge);
                }
                if visited.insert(other.clone()) {
                    next_frontier.push(other);
                }
            }
        }
        frontier = next_frontier;
    }

    let mut related = Vec::new();
    for entity_id in &visited {
        if *entity_id == id {
            continue;
        }
        if let Some(entity) = entities::get(&conn, entity_id)? {
            if entity.is_live() {
                related.push(entity);
            }
        }
    }

    Ok(success(
        StatusCode::OK,
        json!({"entities": related, "relationships": all_edges}),
    ))
}

/// GET /graph/entities/{id}/relationships — active edges in both directions.
pub async fn entity_relationships(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    live_entity(&conn, &id)?;
    let mut connected = edges::edges_from(&conn, &id)?;
    connected.extend(edges::edges_to(&conn, &id)?);
    Ok(success(StatusCode::OK, connected))
}

#[derive(Debug, Deserialize)]
pub struct CreateRelationshipRequest {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// POST /graph/relationships
pub async fn create_relationship(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(request): Body<CreateRelationshipRequest>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    live_entity(&conn, &request.from_id)?;
    live_entity(&conn, &request.to_id)?;
    let edge = edges::create(
        &conn,
        edges::CreateInput {
            from_id: request.from_id,
            to_id: request.to_id,
            edge_type: request.edge_type,
            confidence: request.confidence.unwrap_or(1.0),
            source: request.source.unwrap_or_else(|| agent_id.clone()),
            metadata: request.metadata,
        },
    )?;
    audit::log_best_effort(&conn, Action::GraphWrite, &agent_id, Some(&edge.id), true);
    Ok(success(StatusCode::CREATED, edge))
}

/// GET /graph/relationships/{id}
pub async fn get_relationship(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let edge = edges::get(&conn, &id)?.ok_or(VaultError::NotFound("edge"))?;
    Ok(success(StatusCode::OK, edge))
}

/// DELETE /graph/relationships/{id} — closes the validity interval.
pub async fn delete_relationship(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    edges::close(&conn, &id)?;
    audit::log_best_effort(&conn, Action::GraphWrite, &agent_id, Some(&id), true);
    Ok(success(StatusCode::OK, json!({"deleted": true})))
}
