//! People, device, and grant endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use serde::Deserialize;
use serde_json::json;

use crate::access::{devices, grants, people};
use crate::api::error::ApiResult;
use crate::api::middleware::AgentId;
use crate::api::{lock_db, success, AppState, Body};
use crate::error::VaultError;

// ── People ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreatePersonRequest {
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// POST /people
pub async fn create_person(
    State(state): State<AppState>,
    Body(request): Body<CreatePersonRequest>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let person = people::create(
        &conn,
        &request.name,
        &request.identifier,
        request.metadata.as_ref(),
    )?;
    Ok(success(StatusCode::CREATED, person))
}

/// GET /people
pub async fn list_people(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    Ok(success(StatusCode::OK, people::list(&conn)?))
}

/// GET /people/{id}
pub async fn get_person(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let person = people::get_by_id(&conn, &id)?.ok_or(VaultError::NotFound("person"))?;
    Ok(success(StatusCode::OK, person))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePersonRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// PUT /people/{id}
pub async fn update_person(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Body(request): Body<UpdatePersonRequest>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let person = people::update(&conn, &id, request.name.as_deref(), request.metadata.as_ref())?;
    Ok(success(StatusCode::OK, person))
}

/// DELETE /people/{id} — clears the person's grants alongside.
pub async fn delete_person(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    people::delete(&conn, &id)?;
    grants::delete_by_subject(&conn, "person", &id)?;
    Ok(success(StatusCode::OK, json!({"deleted": true})))
}

// ── Devices ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub identifier: String,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// POST /devices
pub async fn create_device(
    State(state): State<AppState>,
    Body(request): Body<CreateDeviceRequest>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let device = devices::create(
        &conn,
        &request.name,
        &request.identifier,
        request.device_type.as_deref(),
        request.owner_id.as_deref(),
        request.metadata.as_ref(),
    )?;
    Ok(success(StatusCode::CREATED, device))
}

/// GET /devices
pub async fn list_devices(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    Ok(success(StatusCode::OK, devices::list(&conn)?))
}

/// GET /devices/{id}
pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let device = devices::get_by_id(&conn, &id)?.ok_or(VaultError::NotFound("device"))?;
    Ok(success(StatusCode::OK, device))
}

/// DELETE /devices/{id} — clears the device's grants alongside.
pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    devices::delete(&conn, &id)?;
    grants::delete_by_subject(&conn, "device", &id)?;
    Ok(success(StatusCode::OK, json!({"deleted": true})))
}

// ── Grants ───────────────────────────────────────────────────────────────────

/// POST /grants
pub async fn create_grant(
    State(state): State<AppState>,
    AgentId(agent_id): AgentId,
    Body(mut request): Body<grants::CreateInput>,
) -> ApiResult<Response> {
    if request.granted_by.is_none() {
        request.granted_by = Some(agent_id);
    }
    let conn = lock_db(&state.db)?;
    let grant = grants::create(&conn, request)?;
    Ok(success(StatusCode::CREATED, grant))
}

#[derive(Debug, Deserialize)]
pub struct ListGrantsParams {
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub subject_type: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

/// GET /grants
pub async fn list_grants(
    State(state): State<AppState>,
    Query(params): Query<ListGrantsParams>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let grants = grants::list(
        &conn,
        &grants::ListFilter {
            resource_type: params.resource_type,
            resource_id: params.resource_id,
            subject_type: params.subject_type,
            subject_id: params.subject_id,
        },
    )?;
    Ok(success(StatusCode::OK, grants))
}

/// GET /grants/{id}
pub async fn get_grant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let grant = grants::get_by_id(&conn, &id)?.ok_or(VaultError::NotFound("grant"))?;
    Ok(success(StatusCode::OK, grant))
}

/// DELETE /grants/{id}
pub async fn delete_grant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    grants::delete(&conn, &id)?;
    Ok(success(StatusCode::OK, json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct CheckParams {
    pub subject_type: String,
    pub subject_id: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub permission: Option<grants::Permission>,
}

/// GET /grants/check?subject_type=&subject_id=&resource_type=&resource_id=[&permission=]
pub async fn check_grant(
    State(state): State<AppState>,
    Query(params): Query<CheckParams>,
) -> ApiResult<Response> {
    let conn = lock_db(&state.db)?;
    let allowed = match params.permission {
        Some(permission) => grants::check_access_with_permission(
            &conn,
            &params.subject_type,
            &params.subject_id,
            &params.resource_type,
            &params.resource_id,
            permission,
        )?,
        None => grants::check_access(
            &conn,
            &params.subject_type,
            &params.subject_id,
            &params.resource_type,
            &params.resource_id,
        )?,
    };
    Ok(success(StatusCode::OK, json!({"allowed": allowed})))
}
