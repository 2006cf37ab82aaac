//! Storage error types.

use thiserror::Error;

/// Entity store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite error during a store operation
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored JSON column could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint violated (e.g. a project key already in use)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced entity does not exist
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Check if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
            || matches!(
                self,
                StorageError::Database(rusqlite::Error::QueryReturnedNoRows)
            )
    }

    /// Check if this is a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            StorageError::Conflict(_) => true,
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = StorageError::NotFound("project 7".to_string());
        assert!(err.is_not_found());

        let db_err = StorageError::Database(rusqlite::Error::QueryReturnedNoRows);
        assert!(db_err.is_not_found());
        assert!(!db_err.is_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::Conflict("project key 'proj-7'".to_string());
        assert_eq!(err.to_string(), "Conflict: project key 'proj-7'");
        assert!(err.is_conflict());
    }
}
