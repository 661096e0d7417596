use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type shared by all three services.
///
/// Each variant maps to one kind from the error taxonomy; the service that
/// owns the data owns the classification, and the HTTP layer renders every
/// error as `{"error": "..."}` with the matching status code.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Client errors =====
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid id: {0}")]
    ObjectId(#[from] bson::oid::Error),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    // ===== Dependency errors =====
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    // ===== Serialization / crypto =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("password hash error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    // ===== Process-level =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::ObjectId(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to put on the wire. Server-side failures collapse to a
    /// generic message; client errors keep their detail.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::Auth(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::ObjectId(_) => "invalid id".to_string(),
            AppError::Jwt(_) => "invalid or expired token".to_string(),
            AppError::Upstream(_) => "upstream service unavailable".to_string(),
            _ => "internal server error".to_string(),
        }
    }

    /// Log with a level matching the severity.
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, "authentication failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "client error");
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        AppError::Broker(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();
        let status = self.status_code();
        let body = json!({ "error": self.user_message() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<lapin::Error> for AppError {
    fn from(err: lapin::Error) -> Self {
        tracing::error!(error = %err, "broker error occurred");
        AppError::Broker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(AppError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::auth("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::broker("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn server_errors_do_not_leak_detail() {
        let err = AppError::internal("connection string was mongodb://secret");
        assert_eq!(err.user_message(), "internal server error");

        let err = AppError::validation("content is required");
        assert_eq!(err.user_message(), "content is required");
    }
}
