use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::services::signature::{InternalAuthError, SignatureError};
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Server misconfigured: {0}")]
    Misconfigured(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Database(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Database(RepositoryError::InsufficientBalance { .. }) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Misconfigured(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a caller. Server-side failures collapse to
    /// a generic text; the detail only goes to the log.
    fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        // The reason stays in the log; callers only learn that verification failed.
        tracing::warn!(reason = %err, "callback signature rejected");
        AppError::Unauthorized("signature verification failed".to_string())
    }
}

impl From<InternalAuthError> for AppError {
    fn from(err: InternalAuthError) -> Self {
        match err {
            InternalAuthError::NotConfigured => AppError::Misconfigured(err.to_string()),
            InternalAuthError::Missing | InternalAuthError::Mismatch => {
                AppError::Forbidden(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::NotFound("Resource not found".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_repository_errors_map_to_http() {
        assert_eq!(
            AppError::Database(RepositoryError::NotFound("tx".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Database(RepositoryError::Conflict("tx".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Database(RepositoryError::Timeout { attempts: 3 }).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_auth_status_codes() {
        assert_eq!(AppError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::Misconfigured("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let error = AppError::Database(RepositoryError::Database("relation \"x\" does not exist".into()));
        assert_eq!(error.public_message(), "Internal server error");
    }

    #[test]
    fn test_missing_salt_is_unauthorized() {
        let error = AppError::from(SignatureError::SecretNotConfigured);
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_internal_token_failures() {
        assert_eq!(
            AppError::from(InternalAuthError::Missing).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(InternalAuthError::NotConfigured).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_not_found_error_response() {
        let error = AppError::NotFound("Transaction not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
