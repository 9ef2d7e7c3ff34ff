mod config;
mod context;
mod reconcile;
mod report;
mod services;
mod stages;
mod state;
mod tenant;

pub use config::{ImportConfig, ImportTuning};
pub use reconcile::{LineOutcome, Reconciler};
pub use report::{BatchStatusReport, SubmissionReceipt};
pub use services::{
    ExternalJobState, InferenceProvider, JobAction, JobStatus, OpenAiBatchProvider, OutputRecord,
};
pub use tenant::TenantStore;

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::import_batch::{BatchStatus, ImportBatch, RECENT_BATCH_LIMIT},
    },
    utils::config::AppConfig,
};
use tracing::{debug, error, info, warn};

use self::{
    context::{batch_prefix_key, PipelineContext, ScratchPaths},
    stages::{build_requests, stage_request_file, submit_job, unpack_and_discover},
    state::ready,
};
use crate::types::FileMappingTable;

/// What a single poll-and-reconcile attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The batch was not in `processing`; nothing happened.
    NotProcessing,
    /// The external job is still running.
    Waiting,
    /// Another invocation holds the reconciliation lease.
    Busy,
    Completed,
    Failed,
}

#[allow(clippy::module_name_repetitions)]
pub struct ImportPipeline {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    provider: Arc<dyn InferenceProvider>,
    config: ImportConfig,
}

impl ImportPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        app_config: &AppConfig,
        storage: StorageManager,
    ) -> Self {
        let config = ImportConfig::from_app_config(app_config);
        let provider = OpenAiBatchProvider::new(
            openai_client,
            storage.clone(),
            app_config.inference_model.clone(),
            config.tuning.clone(),
        );

        Self::with_provider(db, storage, Arc::new(provider), config)
    }

    pub fn with_provider(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        provider: Arc<dyn InferenceProvider>,
        config: ImportConfig,
    ) -> Self {
        Self {
            db,
            storage,
            provider,
            config,
        }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    /// A contact store bound to `tenant_id`, for use with [`Self::poll_and_reconcile`].
    pub fn tenant_store(&self, tenant_id: &str) -> TenantStore {
        TenantStore::new(tenant_id, Arc::clone(&self.db), self.storage.clone())
    }

    pub async fn create_batch(&self, tenant_id: &str, user_id: &str) -> Result<ImportBatch, AppError> {
        ImportBatch::create_and_add_to_db(tenant_id.to_string(), user_id.to_string(), &self.db)
            .await
    }

    /// Unpack, extract, stage and submit `archive` for a batch made by
    /// [`Self::create_batch`]. On any error the batch ends up `failed` with the error
    /// message and its scratch directory and staged objects are removed.
    #[tracing::instrument(
        skip_all,
        fields(batch_id = %batch.id, tenant_id = %batch.tenant_id, user_id = %batch.user_id)
    )]
    pub async fn process_archive(
        &self,
        batch: ImportBatch,
        archive: &Path,
    ) -> Result<ImportBatch, AppError> {
        let batch = batch.start_extraction(&self.db).await?;
        let mut ctx = PipelineContext::new(
            batch,
            archive.to_path_buf(),
            self.db.as_ref(),
            &self.storage,
            &self.config,
            self.provider.as_ref(),
        );
        let pipeline_started = Instant::now();

        let machine = ready();
        let machine = match unpack_and_discover(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(err) => return Err(ctx.abort(err).await),
        };
        let machine = match build_requests(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(err) => return Err(ctx.abort(err).await),
        };
        let machine = match stage_request_file(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(err) => return Err(ctx.abort(err).await),
        };
        let _machine = match submit_job(machine, &mut ctx).await {
            Ok(machine) => machine,
            Err(err) => return Err(ctx.abort(err).await),
        };

        info!(
            batch_id = %ctx.batch_id,
            total_files = ctx.batch.total_files,
            extracted_files = ctx.batch.extracted_files,
            total_ms = duration_millis(pipeline_started.elapsed()),
            "import batch submitted"
        );

        Ok(ctx.batch)
    }

    /// Check the external job of a `processing` batch and reconcile it once it has
    /// succeeded. Safe to call repeatedly and from several processes: batches in any
    /// other state are left alone and the batch lease keeps reconciliation exclusive.
    #[tracing::instrument(skip_all, fields(batch_id = %batch_id, tenant_id = %store.tenant_id()))]
    pub async fn poll_and_reconcile(
        &self,
        batch_id: &str,
        store: &TenantStore,
    ) -> Result<PollOutcome, AppError> {
        let batch = self
            .db
            .get_item::<ImportBatch>(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("import batch {batch_id}")))?;

        if batch.status != BatchStatus::Processing {
            debug!(status = batch.status.as_str(), "batch is not processing, nothing to poll");
            return Ok(PollOutcome::NotProcessing);
        }
        store.verify_binding(&batch)?;

        let Some(job_id) = batch.external_job_id.clone() else {
            self.fail_batch(&batch, "batch has no external job reference")
                .await?;
            return Ok(PollOutcome::Failed);
        };

        let status = self.provider.poll(&job_id).await?;
        match status.state.action() {
            JobAction::Wait => {
                debug!(external_job_id = %job_id, state = status.state.as_str(), "inference job still running");
                Ok(PollOutcome::Waiting)
            }
            JobAction::Fail => {
                let message = status.error.unwrap_or_else(|| {
                    format!("inference job ended in state {}", status.state.as_str())
                });
                warn!(external_job_id = %job_id, %message, "inference job did not succeed");
                self.fail_batch(&batch, &message).await?;
                Ok(PollOutcome::Failed)
            }
            JobAction::Reconcile => self.reconcile_claimed(&batch, &job_id, store).await,
        }
    }

    async fn reconcile_claimed(
        &self,
        batch: &ImportBatch,
        job_id: &str,
        store: &TenantStore,
    ) -> Result<PollOutcome, AppError> {
        let lease = Duration::from_secs(self.config.tuning.reconcile_lease_secs);
        let Some(claimed) =
            ImportBatch::claim_for_reconcile(&self.db, &batch.id, chrono::Utc::now(), lease)
                .await?
        else {
            debug!("reconciliation lease held elsewhere");
            return Ok(PollOutcome::Busy);
        };

        match self.run_reconciliation(&claimed, job_id, store).await {
            Ok(completed) => {
                info!(
                    success = completed.success_count,
                    failed = completed.failed_count,
                    skipped = completed.skipped_count,
                    processed = completed.processed_files,
                    "import batch completed"
                );
                self.cleanup_batch(&completed.id).await;
                Ok(PollOutcome::Completed)
            }
            Err(err) if err.is_batch_fatal() => {
                error!(error = %err, "reconciliation failed permanently");
                self.fail_batch(&claimed, &err.to_string()).await?;
                Ok(PollOutcome::Failed)
            }
            Err(err) => {
                warn!(error = %err, "reconciliation interrupted, will retry on next poll");
                if let Err(release_err) = claimed.release_lock(&self.db).await {
                    error!(error = %release_err, "failed to release reconciliation lease");
                }
                Err(err)
            }
        }
    }

    async fn run_reconciliation(
        &self,
        batch: &ImportBatch,
        job_id: &str,
        store: &TenantStore,
    ) -> Result<ImportBatch, AppError> {
        let output_uri = batch.output_uri.as_deref().ok_or_else(|| {
            AppError::Processing("batch has no output location recorded".into())
        })?;
        self.provider.collect_outputs(job_id, output_uri).await?;

        let scratch = ScratchPaths::new(&self.config, &batch.id);
        let mapping = match FileMappingTable::load(&scratch.mapping_file()).await {
            Ok(mapping) => mapping,
            Err(AppError::Io(err)) => {
                return Err(AppError::Processing(format!(
                    "file mapping for batch could not be read: {err}"
                )))
            }
            Err(err) => return Err(err),
        };

        let totals = Reconciler::new(self.provider.as_ref(), &self.storage, store)
            .reconcile(batch, &mapping)
            .await?;

        batch.mark_completed(totals, &self.db).await
    }

    async fn fail_batch(&self, batch: &ImportBatch, message: &str) -> Result<(), AppError> {
        batch.mark_failed(message, &self.db).await?;
        self.cleanup_batch(&batch.id).await;
        Ok(())
    }

    /// Drop the scratch directory and staged objects of a batch in a terminal state.
    async fn cleanup_batch(&self, batch_id: &str) {
        if let Err(err) = ScratchPaths::new(&self.config, batch_id).remove().await {
            warn!(%batch_id, error = %err, "failed to remove scratch directory");
        }
        if let Err(err) = self.storage.delete_prefix(&batch_prefix_key(batch_id)).await {
            warn!(%batch_id, error = %err, "failed to remove staged objects");
        }
    }

    /// Current state of a batch owned by `tenant_id`. A `processing` batch is polled
    /// first, so callers see progress without waiting for the timer.
    pub async fn status(
        &self,
        batch_id: &str,
        tenant_id: &str,
    ) -> Result<BatchStatusReport, AppError> {
        let batch = ImportBatch::get_for_tenant(&self.db, batch_id, tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("import batch {batch_id}")))?;

        if batch.status == BatchStatus::Processing {
            let store = self.tenant_store(tenant_id);
            if let Err(err) = self.poll_and_reconcile(batch_id, &store).await {
                warn!(%batch_id, error = %err, "lazy poll failed");
            }
        }

        let current = ImportBatch::get_for_tenant(&self.db, batch_id, tenant_id)
            .await?
            .unwrap_or(batch);
        Ok(BatchStatusReport::from(current))
    }

    pub async fn list_batches(&self, tenant_id: &str) -> Result<Vec<BatchStatusReport>, AppError> {
        let batches = ImportBatch::list_for_tenant(&self.db, tenant_id, RECENT_BATCH_LIMIT).await?;
        Ok(batches.into_iter().map(BatchStatusReport::from).collect())
    }

    /// Operator override for a stuck `processing` batch.
    pub async fn abandon(&self, batch_id: &str, message: &str) -> Result<BatchStatusReport, AppError> {
        let batch = ImportBatch::abandon(&self.db, batch_id, message).await?;
        self.cleanup_batch(&batch.id).await;
        info!(%batch_id, %message, "import batch abandoned");
        Ok(BatchStatusReport::from(batch))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
