use common::storage::StorageError;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

/// Coarse error category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Unauthorised,
    Internal,
}

/// Structured error payload for the request layer.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `NOT_FOUND`, `BAD_REQUEST`,
    /// `ALREADY_EXISTS`, `UNAUTHORISED`, `INTERNAL_ERROR`.
    pub code: &'static str,
    /// Human-readable error description.
    pub message: String,
}

/// Errors raised by drive operations.
///
/// Backend-specific failures (database, blob store) are folded into these
/// variants at the boundary so callers never see them directly.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// Creation target already exists. Reported as `BadRequest`.
    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Unauthorised(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DriveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadRequest(_) | Self::AlreadyExists(_) => ErrorKind::BadRequest,
            Self::Unauthorised(_) => ErrorKind::Unauthorised,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Unauthorised(_) => "UNAUTHORISED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status a request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorised => 401,
            ErrorKind::Internal => 500,
        }
    }

    /// Response payload; internal details are logged, not returned.
    pub fn into_body(self) -> ErrorBody {
        let code = self.code();
        let message = match self {
            Self::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                "An unexpected error occurred".into()
            }
            other => other.to_string(),
        };
        ErrorBody { code, message }
    }
}

impl From<StorageError> for DriveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => DriveError::NotFound(format!("Blob {id} not found")),
            StorageError::SizeLimitExceeded { limit, .. } => {
                DriveError::BadRequest(format!("File exceeds maximum size of {limit} bytes"))
            }
            other => {
                tracing::error!("Blob store failure: {other}");
                DriveError::Internal(other.to_string())
            }
        }
    }
}

impl From<DbErr> for DriveError {
    fn from(err: DbErr) -> Self {
        tracing::error!("Metadata store failure: {err}");
        DriveError::Internal(err.to_string())
    }
}
