use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};
use ingestion_pipeline::ImportPipeline;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub pipeline: Arc<ImportPipeline>,
}

impl ApiState {
    pub async fn new(
        config: &AppConfig,
        storage: StorageManager,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let surreal_db_client = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        surreal_db_client.ensure_initialized().await?;

        let openai_client = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));

        Ok(Self::from_parts(surreal_db_client, openai_client, config, storage))
    }

    pub fn from_parts(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        config: &AppConfig,
        storage: StorageManager,
    ) -> Self {
        let pipeline = Arc::new(ImportPipeline::new(
            Arc::clone(&db),
            openai_client,
            config,
            storage.clone(),
        ));

        Self {
            db,
            config: config.clone(),
            storage,
            pipeline,
        }
    }
}
