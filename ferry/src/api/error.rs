//! HTTP mapping for pipeline errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{Error, ErrorKind};

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::MalformedArchive
            | ErrorKind::UnsupportedVersion
            | ErrorKind::UnpackFailed
            | ErrorKind::InvalidRequest
            | ErrorKind::IncompleteMapping
            | ErrorKind::UnknownUser => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::SessionNotFound | ErrorKind::ProjectNotFound => StatusCode::NOT_FOUND,
            ErrorKind::SessionBusy
            | ErrorKind::ProjectKeyMismatch
            | ErrorKind::ProjectKeyConflict => StatusCode::CONFLICT,
            ErrorKind::ResourceExhausted | ErrorKind::PersistenceFailure => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = %self.kind(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = %self.kind(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            code: self.kind(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::SessionBusy.status_code(), StatusCode::CONFLICT);
        assert_eq!(Error::SessionNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::IncompleteMapping { missing: vec![] }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::ResourceExhausted("full".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Unauthorized("no token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = Error::ProjectKeyConflict("fraud".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "PROJECT_KEY_CONFLICT");
        assert_eq!(json["retryable"], false);
    }
}
