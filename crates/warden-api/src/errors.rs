use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use warden_types::WardenError;

/// API-facing errors with their HTTP status mapping. Every failure leaves
/// the server as a JSON envelope with an explanatory message.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("operation failed: {0}")]
    Internal(String),

    #[error("controller not ready: {0}")]
    NotReady(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal",
            ApiError::NotReady(_) => "not_ready",
        }
    }
}

impl From<WardenError> for ApiError {
    fn from(e: WardenError) -> Self {
        match e {
            WardenError::NotFound(what) => ApiError::NotFound(what),
            WardenError::Configuration(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warden_errors_map_to_statuses() {
        let e: ApiError = WardenError::NotFound("doc".into()).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);

        let e: ApiError = WardenError::Transport("boom".into()).into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.kind(), "internal");
    }
}
