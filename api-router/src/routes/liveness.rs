use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Process is up; no dependency checks.
pub async fn live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")})),
    )
}
