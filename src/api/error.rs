//! HTTP error mapping

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::BookstoreError;

const INTERNAL_MESSAGE: &str = "An internal error occurred. Please try again later.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Bookstore(#[from] BookstoreError),
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self { Self::Unauthorized(message.into()) }
    pub fn forbidden(message: impl Into<String>) -> Self { Self::Forbidden(message.into()) }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Bookstore(e) => match e {
                BookstoreError::Validation(_) | BookstoreError::Rejected(_) => StatusCode::BAD_REQUEST,
                BookstoreError::NotFound(_) => StatusCode::NOT_FOUND,
                BookstoreError::Conflict(_) => StatusCode::CONFLICT,
                BookstoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Bookstore(BookstoreError::Storage(e)) => {
                tracing::error!(error = %e, "Request failed in storage");
                INTERNAL_MESSAGE.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Malformed bodies are validation errors with the usual `{"error"}` body.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Bookstore(BookstoreError::validation(rejection.body_text()))
    }
}

/// JSON request body extractor that rejects through [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

pub type ApiResult<T> = Result<T, ApiError>;
