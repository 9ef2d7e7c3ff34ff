use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use middleware_tenant::tenant_context;
use routes::{
    imports::{get_import_status, list_imports, submit_import},
    liveness::live,
    readiness::ready,
};

pub mod api_state;
pub mod error;
pub mod middleware_tenant;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public endpoints (liveness and readiness checks)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Tenant-scoped endpoints
    let scoped = Router::new()
        .route(
            "/imports",
            post(submit_import)
                .layer(DefaultBodyLimit::max(
                    app_state.config.import_max_upload_bytes,
                ))
                .get(list_imports),
        )
        .route("/imports/{batch_id}", get(get_import_status))
        .route_layer(from_fn(tenant_context));

    public.merge(scoped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_openai::{config::OpenAIConfig, Client};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use common::{
        storage::{db::SurrealDbClient, store::StorageManager},
        utils::config::AppConfig,
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_state() -> ApiState {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        let openai_client = Arc::new(Client::with_config(
            OpenAIConfig::new().with_api_key("test-key"),
        ));
        let config = AppConfig {
            data_dir: std::env::temp_dir()
                .join(format!("imports_api_{}", Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            ..Default::default()
        };
        ApiState::from_parts(Arc::new(db), openai_client, &config, StorageManager::memory())
    }

    fn app(state: &ApiState) -> Router {
        api_routes_v1(state).with_state(state.clone())
    }

    fn scoped_get(uri: &str, tenant: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("X-Tenant-Id", tenant)
            .header("X-User-Id", "user-1")
            .body(Body::empty())
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_checks_are_public() {
        let state = test_state().await;
        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/live")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn import_routes_require_tenant_context() {
        let state = test_state().await;
        let response = app(&state)
            .oneshot(
                Request::builder()
                    .uri("/imports")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["status"], "error");
    }

    #[tokio::test]
    async fn status_is_scoped_to_the_owning_tenant() {
        let state = test_state().await;
        let batch = state
            .pipeline
            .create_batch("tenant-a", "user-1")
            .await
            .expect("batch");

        let response = app(&state)
            .oneshot(scoped_get(&format!("/imports/{}", batch.id), "tenant-a"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["batch_id"], batch.id.as_str());
        assert_eq!(body["status"], "pending");
        assert_eq!(body["progress_percentage"], 0);

        let response = app(&state)
            .oneshot(scoped_get(&format!("/imports/{}", batch.id), "tenant-b"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_returns_tenant_batches() {
        let state = test_state().await;
        for _ in 0..2 {
            state
                .pipeline
                .create_batch("tenant-a", "user-1")
                .await
                .expect("batch");
        }
        state
            .pipeline
            .create_batch("tenant-b", "user-2")
            .await
            .expect("batch");

        let response = app(&state)
            .oneshot(scoped_get("/imports", "tenant-a"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn non_zip_uploads_are_rejected() {
        let state = test_state().await;
        let boundary = "X-IMPORT-BOUNDARY";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"archive\"; filename=\"cv.pdf\"\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.4\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/imports")
            .header("X-Tenant-Id", "tenant-a")
            .header("X-User-Id", "user-1")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request");

        let response = app(&state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    fn zip_upload(entries: &[(&str, &[u8])]) -> Vec<u8> {
        use std::io::Write;

        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            for (name, body) in entries {
                writer
                    .start_file(*name, zip::write::SimpleFileOptions::default())
                    .expect("start entry");
                writer.write_all(body).expect("write entry");
            }
            writer.finish().expect("finish archive");
        }
        buffer.into_inner()
    }

    #[tokio::test]
    async fn failed_submission_reports_the_batch_id() {
        let state = test_state().await;
        let archive = zip_upload(&[("readme.txt", b"no resumes in here".as_slice())]);
        let boundary = "X-IMPORT-BOUNDARY";

        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"archive\"; filename=\"cvs.zip\"\r\nContent-Type: application/zip\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(&archive);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/imports")
            .header("X-Tenant-Id", "tenant-a")
            .header("X-User-Id", "user-1")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request");

        let response = app(&state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        let batch_id = body["batch_id"]
            .as_str()
            .expect("batch id in error body")
            .to_string();

        let response = app(&state)
            .oneshot(scoped_get(&format!("/imports/{batch_id}"), "tenant-a"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let report = json_body(response).await;
        assert_eq!(report["status"], "failed");
        assert!(report["error_message"]
            .as_str()
            .is_some_and(|m| m.contains("no supported documents")));
    }
}
