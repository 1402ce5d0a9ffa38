//! Liveness and stats endpoints.

use axum::{extract::State, http::StatusCode, response::Response};
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::api::{lock_db, success, AppState};
use crate::error::VaultError;
use crate::{access::grants, db, knowledge::store, secrets};

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let report = db::check_database_health(&conn)
        .map_err(|e| ApiError(VaultError::Internal(e.to_string())))?;
    Ok(success(
        StatusCode::OK,
        json!({
            "status": if report.integrity_ok { "ok" } else { "degraded" },
            "database": "ok",
            "schema_version": report.schema_version,
            "sqlite_vec": report.sqlite_vec_version,
        }),
    ))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let knowledge = store::count(&conn)?;
    let secret_count = secrets::count(&conn)?;
    let grant_count = grants::count(&conn)?;
    let entities = crate::graph::entities::count(&conn)?;
    Ok(success(
        StatusCode::OK,
        json!({
            "knowledge_entries": knowledge,
            "secrets": secret_count,
            "grants": grant_count,
            "entities": entities,
        }),
    ))
}
