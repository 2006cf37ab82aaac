use ferry_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Unsupported archive version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Unpack failed: {0}")]
    UnpackFailed(String),

    #[error("Project key mismatch: expected '{expected}', archive declares '{found}'")]
    ProjectKeyMismatch { expected: String, found: String },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Staging session not found")]
    SessionNotFound,

    #[error("Staging session is busy")]
    SessionBusy,

    #[error("Identity mapping is incomplete, unmapped: {}", missing.join(", "))]
    IncompleteMapping { missing: Vec<String> },

    #[error("Unknown destination user: {0}")]
    UnknownUser(String),

    #[error("Project key already exists: {0}")]
    ProjectKeyConflict(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[source] StorageError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MalformedArchive,
    UnsupportedVersion,
    UnpackFailed,
    ProjectKeyMismatch,
    ResourceExhausted,
    SessionNotFound,
    SessionBusy,
    IncompleteMapping,
    UnknownUser,
    ProjectKeyConflict,
    ProjectNotFound,
    PersistenceFailure,
    Unauthorized,
    Forbidden,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedArchive => "MALFORMED_ARCHIVE",
            ErrorKind::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorKind::UnpackFailed => "UNPACK_FAILED",
            ErrorKind::ProjectKeyMismatch => "PROJECT_KEY_MISMATCH",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::SessionBusy => "SESSION_BUSY",
            ErrorKind::IncompleteMapping => "INCOMPLETE_MAPPING",
            ErrorKind::UnknownUser => "UNKNOWN_USER",
            ErrorKind::ProjectKeyConflict => "PROJECT_KEY_CONFLICT",
            ErrorKind::ProjectNotFound => "PROJECT_NOT_FOUND",
            ErrorKind::PersistenceFailure => "PERSISTENCE_FAILURE",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedArchive(_) => ErrorKind::MalformedArchive,
            Error::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Error::UnpackFailed(_) => ErrorKind::UnpackFailed,
            Error::ProjectKeyMismatch { .. } => ErrorKind::ProjectKeyMismatch,
            Error::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Error::SessionNotFound => ErrorKind::SessionNotFound,
            Error::SessionBusy => ErrorKind::SessionBusy,
            Error::IncompleteMapping { .. } => ErrorKind::IncompleteMapping,
            Error::UnknownUser(_) => ErrorKind::UnknownUser,
            Error::ProjectKeyConflict(_) => ErrorKind::ProjectKeyConflict,
            Error::ProjectNotFound(_) => ErrorKind::ProjectNotFound,
            Error::Persistence(_) => ErrorKind::PersistenceFailure,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may re-attempt the same call after remediation.
    ///
    /// The pipeline itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ResourceExhausted | ErrorKind::PersistenceFailure
        )
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Persistence(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(Error::SessionNotFound.kind().as_str(), "SESSION_NOT_FOUND");
        assert_eq!(
            Error::Persistence(StorageError::Backend("disk".into()))
                .kind()
                .to_string(),
            "PERSISTENCE_FAILURE"
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::IncompleteMapping).unwrap(),
            "\"INCOMPLETE_MAPPING\""
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::ResourceExhausted("too many sessions".into()).is_retryable());
        assert!(Error::Persistence(StorageError::Backend("locked".into())).is_retryable());
        assert!(!Error::MalformedArchive("bad".into()).is_retryable());
        assert!(!Error::SessionBusy.is_retryable());
    }

    #[test]
    fn test_incomplete_mapping_message() {
        let err = Error::IncompleteMapping {
            missing: vec!["u1".to_string(), "u2".to_string()],
        };
        assert_eq!(err.to_string(), "Identity mapping is incomplete, unmapped: u1, u2");
    }
}
