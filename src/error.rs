use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Request-level error taxonomy. Every business-rule check surfaces its
/// reason string verbatim to the caller; the HTTP status encodes the kind.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not authorized, no valid session")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Denied(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        ApiError::Denied(msg.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Denied(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = if let ApiError::Internal(e) = &self {
            tracing::error!("internal error: {e:#}");
            json!({ "message": "Server error", "error": e.to_string() })
        } else {
            json!({ "message": self.to_string() })
        };
        (status, Json(body)).into_response()
    }
}

/// True when the error is a violated UNIQUE constraint, which the callers
/// translate into the same denial as their pre-insert check.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
