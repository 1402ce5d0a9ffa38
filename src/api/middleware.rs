//! Request middleware: caller identity, API key auth, and per-agent
//! fixed-window rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::error::VaultError;

/// The caller's agent identity, from the `X-Agent-ID` header. Absent or
/// empty headers resolve to `anonymous`; verification beyond the header is
/// left to the overlay network.
pub struct AgentId(pub String);

impl<S> FromRequestParts<S> for AgentId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let agent = parts
            .headers
            .get("x-agent-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .unwrap_or("anonymous")
            .to_string();
        Ok(AgentId(agent))
    }
}

/// Require `X-API-Key` on mutating requests when a key is configured.
/// GET requests and the health probe stay open.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };
    if request.method() == Method::GET || request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    if provided != Some(expected.as_str()) {
        return ApiError(VaultError::AccessDenied).into_response();
    }
    next.run(request).await
}

/// One per-agent fixed-window counter.
pub struct Limiter {
    max_requests: u32,
    window: Duration,
    hits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Limiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key` and report whether it is within the limit.
    pub fn allow(&self, key: &str) -> bool {
        let Ok(mut hits) = self.hits.lock() else {
            return true;
        };
        let now = Instant::now();
        let times = hits.entry(key.to_string()).or_default();
        times.retain(|t| now.duration_since(*t) < self.window);
        if times.len() >= self.max_requests as usize {
            return false;
        }
        times.push(now);
        true
    }
}

/// The three route-family limiters from the rate-limit config.
pub struct RateLimiter {
    pub knowledge: Limiter,
    pub secret: Limiter,
    pub briefing: Limiter,
}

impl RateLimiter {
    pub fn new(knowledge_per_minute: u32, secret_per_minute: u32, briefing_per_minute: u32) -> Self {
        let window = Duration::from_secs(60);
        Self {
            knowledge: Limiter::new(knowledge_per_minute, window),
            secret: Limiter::new(secret_per_minute, window),
            briefing: Limiter::new(briefing_per_minute, window),
        }
    }
}

async fn limit(
    limiter: &Limiter,
    agent: AgentId,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.allow(&agent.0) {
        return ApiError(VaultError::RateLimited).into_response();
    }
    next.run(request).await
}

pub async fn limit_knowledge(
    State(state): State<AppState>,
    agent: AgentId,
    request: Request,
    next: Next,
) -> Response {
    limit(&state.limiter.knowledge, agent, request, next).await
}

pub async fn limit_secrets(
    State(state): State<AppState>,
    agent: AgentId,
    request: Request,
    next: Next,
) -> Response {
    limit(&state.limiter.secret, agent, request, next).await
}

pub async fn limit_briefings(
    State(state): State<AppState>,
    agent: AgentId,
    request: Request,
    next: Next,
) -> Response {
    limit(&state.limiter.briefing, agent, request, next).await
}
