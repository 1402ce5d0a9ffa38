//! Identity resolution endpoints.

use axum::{
    extract::{Path, State},
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
use crate::graph::aliases;
use crate::identity::{self, ResolveRequest};

/// POST /identity/resolve
pub async fn resolve(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(request): Body<ResolveRequest>,
) -> ApiResult<Response> {
    let mut conn = lock_db(&state.db)?;
    let result = identity::resolve(&mut conn, &request)?;
    audit::log_best_effort(
        &conn,
        Action::IdentityResolve,
        &agent_id,
        Some(&result.entity_id),
        true,
    );
    Ok(success(StatusCode::OK, result))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub survivor_id: String,
    pub merged_id: String,
    #[serde(default)]
    pub approved_by: Option<String>,
}

/// POST /identity/merge
pub async fn merge(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(request): Body<MergeRequest>,
) -> ApiResult<Response> {
    let approved_by = request.approved_by.unwrap_or_else(|| agent_id.clone());
    let mut conn = lock_db(&state.db)?;
    let result = identity::merge(&mut conn, &request.survivor_id, &request.merged_id, &approved_by)?;
    audit::log_best_effort(
        &conn,
        Action::IdentityMerge,
        &agent_id,
        Some(&result.survivor_id),
        true,
    );
    Ok(success(StatusCode::OK, result))
}

/// GET /identity/pending — aliases awaiting review.
pub async fn pending(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let pending = aliases::pending_reviews(&conn)?;
    Ok(success(StatusCode::OK, pending))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approved: bool,
}

/// POST /identity/aliases/{id}/review — approve (reviewed, confidence 1.0)
/// or reject (deleted).
pub async fn review_alias(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Body(request): Body<ReviewRequest>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    aliases::mark_reviewed(&conn, &id, request.approved).map_err(|e| match e {
        VaultError::NotFound(kind) => ApiError(VaultError::NotFound(kind)),
        other => ApiError(VaultError::Review(other.to_string())),
    })?;
    Ok(success(
        StatusCode::OK,
        json!({"reviewed": true, "approved": request.approved}),
    ))
}

/// GET /identity/entities/{id} — the canonical entity with its aliases.
pub async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let entity = match crate::graph::entities::get(&conn, &id)? {
        Some(entity) if entity.is_live() => entity,
        _ => return Err(ApiError(VaultError::NotFound("entity"))),
    };
    let aliases = aliases::list_by_canonical(&conn, &id)?;
    Ok(success(
        StatusCode::OK,
        json!({"entity": entity, "aliases": aliases}),
    ))
}
