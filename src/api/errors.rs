use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::papers::PaperError;

const GENERIC_SERVER_ERROR: &str = "Server error: Please try again later.";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return a generic `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(GENERIC_SERVER_ERROR.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PaperError> for ApiError {
    fn from(err: PaperError) -> Self {
        match err {
            PaperError::Validation(message) => Self::BadRequest(message),
            PaperError::NotFound(message) => Self::NotFound(message),
            PaperError::Generation(message) => Self::ServiceUnavailable(message),
            PaperError::Storage(err) => Self::internal(err, "Database error"),
            PaperError::Export(message) => Self::internal(message, "Error generating PDF"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection.body_text(), "Rejected JSON payload");
        Self::BadRequest("Invalid JSON payload".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::ServiceUnavailable(message) => {
                tracing::error!(error = %message, "Service unavailable");
                message
            }
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::PayloadTooLarge(message)
            | ApiError::Internal(message) => message,
        };

        (status, Json(ErrorResponse { success: false, message })).into_response()
    }
}
