//! Briefing and boot-context endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::middleware::AgentId;
use crate::api::{lock_db, success, AppState};
use crate::audit::{self, Action};
use crate::briefing;

#[derive(Debug, Deserialize)]
pub struct BriefingParams {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub max_items: Option<i64>,
}

/// GET /briefings/{agent_id}?since=ISO8601&max_items=N
pub async fn briefing(
    State(state): State<AppState>,
    AgentId(caller): AgentId,
    Path(agent_id): Path<String>,
    Query(params): Query<BriefingParams>,
) -> ApiResult<Response> {
    let briefing = {
        let conn = lock_db(&state.db)?;
        let briefing = briefing::generate(
            &conn,
            &agent_id,
            params.since.as_deref(),
            params.max_items.unwrap_or(50),
        )?;
        audit::log_best_effort(&conn, Action::BriefingGenerate, &caller, Some(&agent_id), true);
        briefing
    };

    let item_count = briefing
        .briefing
        .sections
        .iter()
        .map(|s| s.items.len())
        .sum();
    state.publisher.briefing_generated(&agent_id, item_count).await;
    Ok(success(StatusCode::OK, briefing))
}

/// GET /context/{agent_id} — boot context as `text/markdown`.
pub async fn context(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Response> {
    let markdown = {
        let conn = lock_db(&state.db)?;
        briefing::boot_context(&conn, &agent_id)?
    };

    state.publisher.context_generated(&agent_id).await;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    )
        .into_response())
}
