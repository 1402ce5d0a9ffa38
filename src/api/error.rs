//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every error leaves the service as the stable envelope
//! `{"error": {"code", "message"}, "meta": {"timestamp"}}` with the status
//! implied by the error kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db;
use crate::error::VaultError;

/// An error returned by an API handler.
#[derive(Debug)]
pub struct ApiError(pub VaultError);

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(VaultError::Validation(message.into()))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            VaultError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VaultError::AccessDenied => StatusCode::FORBIDDEN,
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::Conflict(_) => StatusCode::CONFLICT,
            VaultError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            VaultError::Embedding(_) => StatusCode::BAD_GATEWAY,
            VaultError::Encryption(_)
            | VaultError::Resolve(_)
            | VaultError::Merge(_)
            | VaultError::Review(_)
            | VaultError::Database(_)
            | VaultError::Serialization(_)
            | VaultError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Never leak database detail onto the wire.
        let message = match &self.0 {
            VaultError::Database(_) | VaultError::Serialization(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": message,
            },
            "meta": {"timestamp": db::now()},
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError(VaultError::Validation("x".into())).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError(VaultError::AccessDenied).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError(VaultError::NotFound("secret")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(VaultError::Conflict("secret")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(VaultError::RateLimited).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError(VaultError::Embedding("down".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
