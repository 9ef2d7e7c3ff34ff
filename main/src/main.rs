use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{storage::store::StorageManager, utils::config::get_config};
use ingestion_pipeline::run_poll_loop;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    // Create global storage manager
    let storage = StorageManager::new(&config).await?;

    let api_state = ApiState::new(&config, storage).await?;

    // The poll loop shares the pipeline, and so the db connection, with the API
    let pipeline = Arc::clone(&api_state.pipeline);
    let poll_interval = Duration::from_secs(config.poll_interval_secs.max(1));
    let poller = tokio::spawn(async move {
        info!("Starting import poll loop");
        if let Err(e) = run_poll_loop(pipeline, poll_interval).await {
            error!("Poll loop error: {}", e);
        }
    });

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let served = axum::serve(listener, app).await;
    poller.abort();
    served?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use common::{
        storage::db::SurrealDbClient,
        utils::config::{AppConfig, StorageKind},
    };
    use ingestion_pipeline::run_poll_pass;
    use std::path::Path;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn smoke_test_config(namespace: &str, database: &str, data_dir: &Path) -> AppConfig {
        AppConfig {
            openai_api_key: "test-key".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: namespace.into(),
            surrealdb_database: database.into(),
            data_dir: data_dir.to_string_lossy().into_owned(),
            http_port: 0,
            openai_base_url: "https://example.com".into(),
            storage: StorageKind::Memory,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let namespace = "test_ns";
        let database = format!("test_db_{}", Uuid::new_v4());
        let data_dir = std::env::temp_dir().join(format!("imports_smoke_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&data_dir)
            .await
            .expect("failed to create temp data directory");

        let config = smoke_test_config(namespace, &database, &data_dir);
        let db = Arc::new(
            SurrealDbClient::memory(namespace, &database)
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_initialized()
            .await
            .expect("failed to initialize schema");

        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));

        let storage = StorageManager::new(&config)
            .await
            .expect("failed to build storage manager");

        let api_state = ApiState::from_parts(db, openai_client, &config, storage);

        // Nothing is processing yet, so a poll pass must not touch the provider
        let summary = run_poll_pass(&api_state.pipeline)
            .await
            .expect("poll pass");
        assert_eq!(summary.examined, 0);

        let app = Router::new()
            .nest("/api/v1", api_routes_v1(&api_state))
            .with_state(api_state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/live")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ready")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);

        tokio::fs::remove_dir_all(&data_dir).await.ok();
    }
}
