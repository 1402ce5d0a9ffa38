//! Semantic overlay endpoints: status, clusters, neighbours, proposals.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::api::{lock_db, success, AppState, Body};
use crate::error::VaultError;
use crate::graph::{clusters, embeddings};

/// GET /semantic/status
pub async fn status(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let active_clusters = clusters::list_active_clusters(&conn)?.len();
    let pending_proposals = clusters::pending_proposals(&conn)?.len();
    let embedded: i64 = conn
        .query_row("SELECT COUNT(*) FROM entity_embeddings", [], |r| r.get(0))
        .map_err(VaultError::from)?;

    Ok(success(
        StatusCode::OK,
        json!({
            "enabled": state.semantic.enabled,
            "thresholds": {
                "edge": state.semantic.edge_threshold,
                "cluster_join": state.semantic.cluster_join_threshold,
                "auto_merge": state.semantic.auto_merge_threshold,
                "merge_proposal": state.semantic.merge_proposal_threshold,
            },
            "intervals_secs": {
                "embed": state.semantic.embed_interval.as_secs(),
                "scan": state.semantic.scan_interval.as_secs(),
                "cluster": state.semantic.cluster_interval.as_secs(),
            },
            "embedded_entities": embedded,
            "active_clusters": active_clusters,
            "pending_proposals": pending_proposals,
        }),
    ))
}

/// GET /semantic/clusters — active clusters with member counts.
pub async fn list_clusters(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let mut out = Vec::new();
    for cluster in clusters::list_active_clusters(&conn)? {
        let members = clusters::cluster_members(&conn, &cluster.id)?.len();
        out.push(json!({
            "id": cluster.id,
            "label": cluster.label,
            "member_count": members,
            "created_at": cluster.created_at,
            "updated_at": cluster.updated_at,
        }));
    }
    Ok(success(StatusCode::OK, out))
}

/// GET /semantic/clusters/{id}/members
pub async fn cluster_members(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let cluster = clusters::get_cluster(&conn, &id)?.ok_or(VaultError::NotFound("cluster"))?;
    let members = clusters::cluster_members(&conn, &cluster.id)?;
    Ok(success(
        StatusCode::OK,
        json!({"cluster_id": cluster.id, "label": cluster.label, "members": members}),
    ))
}

/// GET /semantic/entities/{id}/clusters
pub async fn entity_clusters(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let clusters = clusters::entity_clusters(&conn, &id)?;
    Ok(success(StatusCode::OK, clusters))
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub min_similarity: Option<f64>,
}

/// GET /semantic/similar/{id}?limit&min_similarity
pub async fn similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> ApiResult<Response> {
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let min_similarity = params.min_similarity.unwrap_or(0.7);

    let conn = lock_db(&state.db)?;
    match crate::graph::entities::get(&conn, &id)? {
        Some(entity) if entity.is_live() => {}
        _ => return Err(ApiError(VaultError::NotFound("entity"))),
    }
    let similar = embeddings::find_similar_to_entity(&conn, &id, limit, min_similarity)?;
    Ok(success(StatusCode::OK, similar))
}

/// GET /semantic/proposals — pending merge proposals.
pub async fn proposals(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let proposals = clusters::pending_proposals(&conn)?;
    Ok(success(StatusCode::OK, proposals))
}

#[derive(Debug, Deserialize)]
pub struct ReviewProposalRequest {
    pub status: String,
    #[serde(default)]
    pub reviewed_by: String,
}

/// POST /semantic/proposals/{id}/review
pub async fn review_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Body(request): Body<ReviewProposalRequest>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    clusters::resolve_proposal(&conn, &id, &request.status, &request.reviewed_by).map_err(
        |e| match e {
            VaultError::NotFound(kind) => ApiError(VaultError::NotFound(kind)),
            VaultError::Validation(msg) => ApiError(VaultError::Validation(msg)),
            other => ApiError(VaultError::Review(other.to_string())),
        },
    )?;
    Ok(success(
        StatusCode::OK,
        json!({"reviewed": true, "status": request.status}),
    ))
}
