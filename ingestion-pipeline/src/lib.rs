#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod pipeline;
pub mod types;
pub mod utils;

use common::storage::types::import_batch::ImportBatch;
pub use pipeline::{
    BatchStatusReport, ImportConfig, ImportPipeline, ImportTuning, PollOutcome, SubmissionReceipt,
    TenantStore,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Tally of one pass over all processing batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub waiting: usize,
    pub busy: usize,
    pub errors: usize,
}

/// Poll every `processing` batch across all tenants once. Each batch is reconciled
/// against a store bound to its own tenant; an error on one batch is logged and the
/// pass moves on to the next.
pub async fn run_poll_pass(pipeline: &ImportPipeline) -> Result<PollSummary, common::error::AppError> {
    let batches = ImportBatch::get_processing(pipeline.db()).await?;
    let mut summary = PollSummary::default();

    for batch in batches {
        summary.examined = summary.examined.saturating_add(1);
        let store = pipeline.tenant_store(&batch.tenant_id);

        match pipeline.poll_and_reconcile(&batch.id, &store).await {
            Ok(PollOutcome::Completed) => summary.completed = summary.completed.saturating_add(1),
            Ok(PollOutcome::Failed) => summary.failed = summary.failed.saturating_add(1),
            Ok(PollOutcome::Waiting) => summary.waiting = summary.waiting.saturating_add(1),
            Ok(PollOutcome::Busy) => summary.busy = summary.busy.saturating_add(1),
            Ok(PollOutcome::NotProcessing) => {}
            Err(err) => {
                summary.errors = summary.errors.saturating_add(1);
                error!(
                    batch_id = %batch.id,
                    tenant_id = %batch.tenant_id,
                    error = %err,
                    "poll failed for import batch"
                );
            }
        }
    }

    info!(
        examined = summary.examined,
        completed = summary.completed,
        failed = summary.failed,
        waiting = summary.waiting,
        busy = summary.busy,
        errors = summary.errors,
        "poll pass finished"
    );
    Ok(summary)
}

pub async fn run_poll_loop(
    pipeline: Arc<ImportPipeline>,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(interval_secs = interval.as_secs(), "starting import poll loop");

    loop {
        if let Err(err) = run_poll_pass(&pipeline).await {
            error!(error = %err, "failed to list processing import batches");
            warn!("Backing off for 1s after poll error");
            sleep(Duration::from_secs(1)).await;
            continue;
        }
        sleep(interval).await;
    }
}
