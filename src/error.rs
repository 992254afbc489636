use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::validation::ValidationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("token error: {0}")]
    Token(#[from] anyhow::Error),
}

/// Standardized API error response body
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, ApiErrorBody) {
        let (status, code, message) = match self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, "VALIDATION", e.to_string()),
            ApiError::Store(StoreError::DuplicateEmail) => (
                StatusCode::CONFLICT,
                "EMAIL_TAKEN",
                "Email already registered".to_string(),
            ),
            ApiError::Store(StoreError::InvalidCredentials) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid email or password".to_string(),
            ),
            ApiError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", "User not found".to_string())
            }
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.to_string())
            }
            ApiError::Store(_) | ApiError::Token(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred.".to_string(),
            ),
        };
        (
            status,
            ApiErrorBody {
                code: code.to_string(),
                message,
            },
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_http_status() {
        let cases = [
            (ApiError::from(StoreError::DuplicateEmail), StatusCode::CONFLICT),
            (ApiError::from(StoreError::InvalidCredentials), StatusCode::UNAUTHORIZED),
            (ApiError::from(StoreError::NotFound), StatusCode::NOT_FOUND),
            (
                ApiError::from(StoreError::Hashing("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::from(ValidationError::PasswordTooShort),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_and_body().0, expected, "{err}");
        }
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ApiError::from(StoreError::Hashing("salt exploded".into()));
        let (_, body) = err.status_and_body();
        assert!(!body.message.contains("salt"));
        assert_eq!(body.code, "INTERNAL_ERROR");
    }
}
