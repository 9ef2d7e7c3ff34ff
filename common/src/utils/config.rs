use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Memory,
    S3,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_inference_model")]
    pub inference_model: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub import_max_upload_bytes: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_extraction_concurrency")]
    pub extraction_concurrency: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_inference_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_upload_bytes() -> usize {
    500 * 1024 * 1024
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_extraction_concurrency() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: String::new(),
            surrealdb_database: String::new(),
            data_dir: default_data_dir(),
            http_port: default_http_port(),
            openai_base_url: default_base_url(),
            inference_model: default_inference_model(),
            storage: default_storage_kind(),
            s3_bucket: None,
            import_max_upload_bytes: default_max_upload_bytes(),
            poll_interval_secs: default_poll_interval_secs(),
            extraction_concurrency: default_extraction_concurrency(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
