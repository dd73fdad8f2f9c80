use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FirestoreErrorCode {
    InvalidArgument,
    MissingProjectId,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Internal,
    Cancelled,
    PermissionDenied,
    Unavailable,
    DeadlineExceeded,
    /// Any other failure reported by the database driver, passed through untouched.
    Backend,
}

impl FirestoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirestoreErrorCode::InvalidArgument => "firestore/invalid-argument",
            FirestoreErrorCode::MissingProjectId => "firestore/missing-project-id",
            FirestoreErrorCode::NotFound => "firestore/not-found",
            FirestoreErrorCode::AlreadyExists => "firestore/already-exists",
            FirestoreErrorCode::FailedPrecondition => "firestore/failed-precondition",
            FirestoreErrorCode::Internal => "firestore/internal",
            FirestoreErrorCode::Cancelled => "firestore/cancelled",
            FirestoreErrorCode::PermissionDenied => "firestore/permission-denied",
            FirestoreErrorCode::Unavailable => "firestore/unavailable",
            FirestoreErrorCode::DeadlineExceeded => "firestore/deadline-exceeded",
            FirestoreErrorCode::Backend => "firestore/backend",
        }
    }

    /// Maps a canonical RPC status name (`NOT_FOUND`, `FAILED_PRECONDITION`, ...)
    /// onto an error code. Unknown names map to [`FirestoreErrorCode::Backend`].
    pub fn from_status_name(status: &str) -> Self {
        match status {
            "INVALID_ARGUMENT" | "OUT_OF_RANGE" => FirestoreErrorCode::InvalidArgument,
            "NOT_FOUND" => FirestoreErrorCode::NotFound,
            "ALREADY_EXISTS" => FirestoreErrorCode::AlreadyExists,
            "FAILED_PRECONDITION" => FirestoreErrorCode::FailedPrecondition,
            "INTERNAL" | "DATA_LOSS" => FirestoreErrorCode::Internal,
            "CANCELLED" => FirestoreErrorCode::Cancelled,
            "PERMISSION_DENIED" | "UNAUTHENTICATED" => FirestoreErrorCode::PermissionDenied,
            "UNAVAILABLE" => FirestoreErrorCode::Unavailable,
            "DEADLINE_EXCEEDED" => FirestoreErrorCode::DeadlineExceeded,
            _ => FirestoreErrorCode::Backend,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FirestoreError {
    pub code: FirestoreErrorCode,
    message: String,
}

impl FirestoreError {
    pub fn new(code: FirestoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.code == FirestoreErrorCode::NotFound
    }
}

impl Display for FirestoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for FirestoreError {}

pub type FirestoreResult<T> = Result<T, FirestoreError>;

pub fn invalid_argument(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::InvalidArgument, message)
}

pub fn missing_project_id() -> FirestoreError {
    FirestoreError::new(
        FirestoreErrorCode::MissingProjectId,
        "Firestore client configuration must include a project_id",
    )
}

pub fn not_found(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::NotFound, message)
}

pub fn already_exists(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::AlreadyExists, message)
}

pub fn failed_precondition(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::FailedPrecondition, message)
}

pub fn internal_error(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Internal, message)
}

pub fn cancelled(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Cancelled, message)
}

pub fn permission_denied(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::PermissionDenied, message)
}

pub fn unavailable(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Unavailable, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::DeadlineExceeded, message)
}

pub fn backend_error(message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::Backend, message)
}

/// Builds an error from a canonical RPC status name reported by a driver.
pub fn from_status(status: &str, message: impl Into<String>) -> FirestoreError {
    FirestoreError::new(FirestoreErrorCode::from_status_name(status), message)
}
