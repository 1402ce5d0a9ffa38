//! Secret endpoints.
//!
//! Effective access combines the legacy scope predicate with the grant
//! store: a request passes when either allows it, and a grant at `admin`
//! satisfies any tier.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::access::grants::{self, Permission};
use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::AgentId;
use crate::api::{lock_db, success, AppState, Body};
use crate::audit::{self, Action};
use crate::error::VaultError;
use crate::secrets::{self, Secret, MAX_VALUE_BYTES};

/// Legacy scope OR a grant at the required tier (keyed by secret name).
fn effective_access(
    conn: &Connection,
    secret: &Secret,
    agent_id: &str,
    permission: Permission,
) -> ApiResult<bool> {
    if secrets::can_access(secret, agent_id) {
        return Ok(true);
    }
    Ok(grants::check_access_with_permission(
        conn, "agent", agent_id, "secret", &secret.name, permission,
    )?)
}

fn validate_value(value: &str) -> ApiResult<()> {
    if value.is_empty() {
        return Err(ApiError::validation("value is required"));
    }
    if value.len() > MAX_VALUE_BYTES {
        return Err(ApiError::validation("value exceeds 10KiB limit"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub rotation_interval_days: Option<i64>,
}

/// POST /secrets
pub async fn create(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(request): Body<CreateRequest>,
) -> ApiResult<Response> {
    if request.name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    validate_value(&request.value)?;

    let token = state.cipher.encrypt(&request.value);
    let conn = lock_db(&state.db)?;
    let secret = secrets::create(
        &conn,
        secrets::CreateInput {
            name: request.name,
            encrypted_value: token,
            description: request.description,
            scope: request.scope,
            rotation_interval_days: request.rotation_interval_days,
            created_by: agent_id.clone(),
            ..Default::default()
        },
    )?;
    audit::log_best_effort(&conn, Action::SecretWrite, &agent_id, Some(&secret.name), true);
    Ok(success(StatusCode::CREATED, secret))
}

/// GET /secrets — metadata only, never values.
pub async fn list(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let secrets = secrets::list(&conn)?;
    Ok(success(StatusCode::OK, secrets))
}

/// GET /secrets/{name} — decrypts for authorised callers.
pub async fn get_one(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let (secret, value) = {
        let conn = lock_db(&state.db)?;
        let secret = secrets::get_by_name(&conn, &name)?.ok_or(VaultError::NotFound("secret"))?;
        if !effective_access(&conn, &secret, &agent_id, Permission::Read)? {
            audit::log_best_effort(&conn, Action::SecretRead, &agent_id, Some(&name), false);
            return Err(ApiError(VaultError::AccessDenied));
        }
        let value = state.cipher.decrypt(&secret.encrypted_value)?;
        audit::log_best_effort(&conn, Action::SecretRead, &agent_id, Some(&name), true);
        (secret, value)
    };

    state.publisher.secret_accessed(&agent_id, &name, true).await;
    Ok(success(
        StatusCode::OK,
        json!({
            "name": secret.name,
            "value": value,
            "description": secret.description,
            "scope": secret.scope,
            "last_rotated_at": secret.last_rotated_at,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ValueRequest {
    pub value: String,
}

/// PUT /secrets/{name} — overwrite the value (no history row).
pub async fn update(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(name): Path<String>,
    Body(request): Body<ValueRequest>,
) -> ApiResult<Response> {
    validate_value(&request.value)?;

    let conn = lock_db(&state.db)?;
    let secret = secrets::get_by_name(&conn, &name)?.ok_or(VaultError::NotFound("secret"))?;
    if !effective_access(&conn, &secret, &agent_id, Permission::Write)? {
        return Err(ApiError(VaultError::AccessDenied));
    }

    let token = state.cipher.encrypt(&request.value);
    secrets::update_value(&conn, &name, &token)?;
    audit::log_best_effort(&conn, Action::SecretWrite, &agent_id, Some(&name), true);
    Ok(success(StatusCode::OK, json!({"updated": true})))
}

/// DELETE /secrets/{name} — also clears the secret's grants.
pub async fn delete(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let secret = secrets::get_by_name(&conn, &name)?.ok_or(VaultError::NotFound("secret"))?;
    if !effective_access(&conn, &secret, &agent_id, Permission::Admin)? {
        return Err(ApiError(VaultError::AccessDenied));
    }

    secrets::delete(&conn, &name)?;
    grants::delete_by_resource(&conn, "secret", &name)?;
    audit::log_best_effort(&conn, Action::SecretDelete, &agent_id, Some(&name), true);
    Ok(success(StatusCode::OK, json!({"deleted": true})))
}

/// POST /secrets/{name}/rotate — history row plus new live value, atomic.
pub async fn rotate(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Path(name): Path<String>,
    Body(request): Body<ValueRequest>,
) -> ApiResult<Response> {
    validate_value(&request.value)?;

    {
        let mut conn = lock_db(&state.db)?;
        let secret = secrets::get_by_name(&conn, &name)?.ok_or(VaultError::NotFound("secret"))?;
        if !effective_access(&conn, &secret, &agent_id, Permission::Write)? {
            return Err(ApiError(VaultError::AccessDenied));
        }

        let token = state.cipher.encrypt(&request.value);
        secrets::rotate(&mut conn, &name, &token, &agent_id)?;
        audit::log_best_effort(&conn, Action::SecretRotate, &agent_id, Some(&name), true);
    }

    state.publisher.secret_rotated(&name, &agent_id).await;
    Ok(success(StatusCode::OK, json!({"rotated": true})))
}
