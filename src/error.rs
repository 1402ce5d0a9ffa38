//! The error type shared by all vault subsystems.
//!
//! Each variant maps onto one of the wire error codes ([`VaultError::code`])
//! so the HTTP layer can translate errors without string matching.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

/// All errors produced by the vault core.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Caller sent a malformed or out-of-range request.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requester is not allowed to perform the operation.
    #[error("access denied")]
    AccessDenied,

    /// The resource does not exist (or is soft-deleted and the requester is
    /// not allowed to know the difference). Carries the resource kind, e.g.
    /// `"knowledge"` or `"secret"`.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A uniqueness constraint was violated. Carries the conflicting kind.
    #[error("{0} already exists")]
    Conflict(&'static str),

    /// The caller exceeded its rate limit.
    #[error("rate limited")]
    RateLimited,

    /// Encrypting or decrypting a secret value failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The embedding provider failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Identity resolution failed.
    #[error("resolve failed: {0}")]
    Resolve(String),

    /// An entity merge failed and was rolled back.
    #[error("merge failed: {0}")]
    Merge(String),

    /// Reviewing an alias or merge proposal failed.
    #[error("review failed: {0}")]
    Review(String),

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON (de)serialization error at a store boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// The stable wire error code for this error.
    pub fn code(&self) -> String {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR".into(),
            Self::AccessDenied => "ACCESS_DENIED".into(),
            Self::NotFound(kind) => format!("{}_NOT_FOUND", kind.to_uppercase()),
            Self::Conflict(kind) => format!("{}_ALREADY_EXISTS", kind.to_uppercase()),
            Self::RateLimited => "RATE_LIMITED".into(),
            Self::Encryption(_) => "ENCRYPTION_FAILED".into(),
            Self::Embedding(_) => "EMBEDDING_FAILED".into(),
            Self::Resolve(_) => "RESOLVE_ERROR".into(),
            Self::Merge(_) => "MERGE_ERROR".into(),
            Self::Review(_) => "REVIEW_ERROR".into(),
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => {
                "INTERNAL_ERROR".into()
            }
        }
    }

    /// True if the underlying cause is a SQLite uniqueness violation.
    /// Used by callers that turn constraint races into lookups (identity
    /// resolution) or into [`VaultError::Conflict`].
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(VaultError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(VaultError::AccessDenied.code(), "ACCESS_DENIED");
        assert_eq!(VaultError::NotFound("secret").code(), "SECRET_NOT_FOUND");
        assert_eq!(VaultError::Conflict("grant").code(), "GRANT_ALREADY_EXISTS");
        assert_eq!(VaultError::RateLimited.code(), "RATE_LIMITED");
        assert_eq!(VaultError::Encryption("k".into()).code(), "ENCRYPTION_FAILED");
    }

    #[test]
    fn unique_violation_detection() {
        let err = VaultError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed: aliases.alias_type".into()),
        ));
        assert!(err.is_unique_violation());
        assert!(!VaultError::AccessDenied.is_unique_violation());
    }
}
