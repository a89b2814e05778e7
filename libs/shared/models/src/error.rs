use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not permitted: {0}")]
    Policy(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind, surfaced as the problem `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "auth_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) | AppError::ValidationError(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::Policy(_) => "policy_error",
            AppError::State(_) => "state_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "Authentication Required",
            AppError::NotFound(_) => "Not Found",
            AppError::BadRequest(_) | AppError::ValidationError(_) => "Validation Error",
            AppError::Conflict(_) => "Conflict",
            AppError::Policy(_) => "Not Permitted",
            AppError::State(_) => "Invalid State",
            AppError::Internal(_) => "Internal Server Error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::State(_) => StatusCode::CONFLICT,
            AppError::Policy(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Auth(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ValidationError(msg)
            | AppError::Conflict(msg)
            | AppError::Policy(msg)
            | AppError::State(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!("Error: {}: {}", status, message);
        } else {
            tracing::warn!("Request rejected: {} ({}): {}", status, self.kind(), message);
        }

        let body = Json(json!({
            "type": self.kind(),
            "title": self.title(),
            "status": status.as_u16(),
            "detail": message,
            "error": message
        }));

        (status, body).into_response()
    }
}
