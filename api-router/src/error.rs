use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{inner}")]
    Batch {
        batch_id: String,
        inner: Box<ApiError>,
    },
}

impl ApiError {
    /// Tie the error to the import batch that recorded it, so callers can look
    /// the batch up afterwards.
    pub fn for_batch(self, batch_id: impl Into<String>) -> Self {
        Self::Batch {
            batch_id: batch_id.into(),
            inner: Box::new(self),
        }
    }

    fn into_parts(self) -> (StatusCode, String, Option<String>) {
        match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message, None),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message, None),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message, None),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message, None),
            Self::Batch { batch_id, inner } => {
                let (status, message, _) = inner.into_parts();
                (status, message, Some(batch_id))
            }
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::TenantMismatch { .. } => {
                tracing::warn!("Tenant mismatch: {:?}", err);
                Self::Forbidden("Batch belongs to another tenant".to_string())
            }
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, batch_id) = self.into_parts();

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
                batch_id,
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn app_errors_map_onto_api_errors() {
        let api_error = ApiError::from(AppError::NotFound("import batch b1".to_string()));
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "import batch b1"));

        let api_error = ApiError::from(AppError::Validation("archive is empty".to_string()));
        assert!(matches!(api_error, ApiError::ValidationError(msg) if msg == "archive is empty"));

        let api_error = ApiError::from(AppError::TenantMismatch {
            expected: "tenant-a".into(),
            actual: "tenant-b".into(),
        });
        assert!(matches!(api_error, ApiError::Forbidden(_)));

        let api_error = ApiError::from(AppError::Io(std::io::Error::other("disk full")));
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(ApiError::NotFound("x".to_string()), StatusCode::NOT_FOUND);
        assert_status_code(
            ApiError::ValidationError("x".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::Unauthorized("x".to_string()),
            StatusCode::UNAUTHORIZED,
        );
        assert_status_code(ApiError::Forbidden("x".to_string()), StatusCode::FORBIDDEN);
        assert_status_code(
            ApiError::ValidationError("x".to_string()).for_batch("b1"),
            StatusCode::BAD_REQUEST,
        );
    }

    #[tokio::test]
    async fn batch_errors_carry_the_batch_id() {
        let error = ApiError::from(AppError::Validation("archive is empty".to_string()))
            .for_batch("batch-1");
        assert_eq!(error.to_string(), "Validation error: archive is empty");

        let response = error.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["batch_id"], "batch-1");
        assert_eq!(body["error"], "archive is empty");
        assert_eq!(body["status"], "error");
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let api_error = ApiError::from(AppError::Processing("secret mapping path".to_string()));
        assert_eq!(api_error.to_string(), "Internal server error");
        assert!(matches!(api_error, ApiError::InternalError(msg) if !msg.contains("secret")));
    }
}
