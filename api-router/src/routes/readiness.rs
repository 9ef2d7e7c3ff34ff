use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

const STORAGE_CHECK_KEY: &str = "health/ready";

/// Ready when both the database and the object store answer.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let db = state.db.client.query("RETURN true").await.map(|_| ());
    let storage = state.storage.exists(STORAGE_CHECK_KEY).await.map(|_| ());

    let check = |ok: bool| if ok { "ok" } else { "fail" };
    let checks = json!({ "db": check(db.is_ok()), "storage": check(storage.is_ok()) });

    match (db, storage) {
        (Ok(()), Ok(())) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "checks": checks })),
        ),
        (db, storage) => {
            let reason = db
                .err()
                .map(|e| e.to_string())
                .or_else(|| storage.err().map(|e| e.to_string()))
                .unwrap_or_default();
            tracing::warn!(%reason, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "checks": checks, "reason": reason })),
            )
        }
    }
}
