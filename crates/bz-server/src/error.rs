use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use bz_core::BzError;

use crate::validation::ValidationError;

/// Body of every 404, including admin routes hidden from non-admins.
pub const NOT_FOUND_MESSAGE: &str = "The requested resource was not found.";

#[derive(Debug)]
pub enum ApiError {
    /// 400 with the first failing field.
    Validation { path: String, message: String },
    /// 404 with a human-readable message.
    NotFound(String),
    /// 401: bad credentials, or an anonymous caller attempting a write.
    Unauthorized,
    /// 500: `context` names the failed operation ("Failed to create post").
    Internal { context: String, details: String },
}

impl ApiError {
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn hidden() -> Self {
        Self::NotFound(NOT_FOUND_MESSAGE.into())
    }

    /// Map a store error, using `context` for anything that is not the
    /// caller's fault.
    pub fn from_store(err: BzError, context: &str) -> Self {
        match err {
            BzError::NotFound(id) => Self::NotFound(format!(
                "{} with ID {} not found.",
                id.table().label(),
                id.key()
            )),
            BzError::InvalidInput(message) => Self::validation("", message),
            BzError::Validation { path, message } => Self::Validation { path, message },
            other => {
                tracing::error!(error = %other, "{context}");
                Self::Internal {
                    context: context.to_string(),
                    details: other.to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation { path, message } => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Validation error",
                    "details": [{ "path": path, "message": message }],
                })),
            )
                .into_response(),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": { "code": "not_found", "message": message } })),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": { "code": "unauthorized", "message": "Invalid or missing bearer token." }
                })),
            )
                .into_response(),
            Self::Internal { context, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": context, "details": details })),
            )
                .into_response(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation {
            path: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation("", rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Attach a failure context to store results.
pub trait OrFail<T> {
    fn or_fail(self, context: &str) -> ApiResult<T>;
}

impl<T> OrFail<T> for Result<T, BzError> {
    fn or_fail(self, context: &str) -> ApiResult<T> {
        self.map_err(|err| ApiError::from_store(err, context))
    }
}
