use std::path::PathBuf;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager, types::import_batch::ImportBatch},
};
use tracing::error;

use super::{config::ImportConfig, services::InferenceProvider};
use crate::{types::FileMappingTable, utils::archive::DiscoveredFile};

pub const EXTRACTED_DIR: &str = "extracted";
pub const REQUEST_FILE: &str = "input.jsonl";
pub const MAPPING_FILE: &str = "file_mapping.json";

/// Scratch layout for one batch: `tmp/batch-{id}/{extracted/, input.jsonl, file_mapping.json}`.
#[derive(Debug, Clone)]
pub struct ScratchPaths {
    pub root: PathBuf,
}

impl ScratchPaths {
    pub fn new(config: &ImportConfig, batch_id: &str) -> Self {
        Self {
            root: config.scratch_dir(batch_id),
        }
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.root.join(EXTRACTED_DIR)
    }

    pub fn request_file(&self) -> PathBuf {
        self.root.join(REQUEST_FILE)
    }

    pub fn mapping_file(&self) -> PathBuf {
        self.root.join(MAPPING_FILE)
    }

    /// Remove the scratch directory. A directory that is already gone is fine.
    pub async fn remove(&self) -> Result<(), AppError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Object-store prefix holding everything staged for one batch.
pub fn batch_prefix_key(batch_id: &str) -> String {
    format!("batches/{batch_id}")
}

pub fn input_key(batch_id: &str) -> String {
    format!("{}/{REQUEST_FILE}", batch_prefix_key(batch_id))
}

pub fn output_prefix_key(batch_id: &str) -> String {
    format!("{}/output/", batch_prefix_key(batch_id))
}

pub struct PipelineContext<'a> {
    pub batch: ImportBatch,
    pub batch_id: String,
    pub tenant_id: String,
    pub archive: PathBuf,
    pub scratch: ScratchPaths,
    pub db: &'a SurrealDbClient,
    pub storage: &'a StorageManager,
    pub config: &'a ImportConfig,
    pub provider: &'a dyn InferenceProvider,
    pub discovered: Vec<DiscoveredFile>,
    pub mapping: FileMappingTable,
    pub input_uri: Option<String>,
    pub output_uri: Option<String>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        batch: ImportBatch,
        archive: PathBuf,
        db: &'a SurrealDbClient,
        storage: &'a StorageManager,
        config: &'a ImportConfig,
        provider: &'a dyn InferenceProvider,
    ) -> Self {
        let batch_id = batch.id.clone();
        let tenant_id = batch.tenant_id.clone();
        let scratch = ScratchPaths::new(config, &batch_id);
        Self {
            batch,
            batch_id,
            tenant_id,
            archive,
            scratch,
            db,
            storage,
            config,
            provider,
            discovered: Vec::new(),
            mapping: FileMappingTable::new(),
            input_uri: None,
            output_uri: None,
        }
    }

    pub fn input_uri(&self) -> Result<&str, AppError> {
        self.input_uri
            .as_deref()
            .ok_or_else(|| AppError::InternalError("request file expected to be staged".into()))
    }

    pub fn output_uri(&self) -> Result<&str, AppError> {
        self.output_uri
            .as_deref()
            .ok_or_else(|| AppError::InternalError("output prefix expected to be known".into()))
    }

    /// Fail the batch and drop its scratch directory and staged objects. The original
    /// error is returned so callers can propagate it.
    pub async fn abort(&mut self, err: AppError) -> AppError {
        error!(
            batch_id = %self.batch_id,
            tenant_id = %self.tenant_id,
            error = %err,
            "import pipeline aborted"
        );

        let current = match self.db.get_item::<ImportBatch>(&self.batch_id).await {
            Ok(Some(current)) => current,
            Ok(None) => self.batch.clone(),
            Err(db_err) => {
                error!(batch_id = %self.batch_id, error = %db_err, "failed to reload batch");
                self.batch.clone()
            }
        };

        if !current.status.is_terminal() {
            match current.mark_failed(&err.to_string(), self.db).await {
                Ok(failed) => self.batch = failed,
                Err(mark_err) => {
                    error!(batch_id = %self.batch_id, error = %mark_err, "failed to mark batch failed");
                }
            }
        }

        if let Err(cleanup_err) = self.scratch.remove().await {
            error!(batch_id = %self.batch_id, error = %cleanup_err, "failed to remove scratch directory");
        }
        if let Err(cleanup_err) = self
            .storage
            .delete_prefix(&batch_prefix_key(&self.batch_id))
            .await
        {
            error!(batch_id = %self.batch_id, error = %cleanup_err, "failed to remove staged objects");
        }

        err
    }
}
