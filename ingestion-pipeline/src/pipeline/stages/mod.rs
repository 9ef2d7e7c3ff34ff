use common::{error::AppError, storage::types::import_batch::FileIssue};
use futures::{stream, StreamExt};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use super::{
    context::{input_key, output_prefix_key, PipelineContext},
    state::{ImportMachine, Ready, RequestsBuilt, Staged, Submitted, Unpacked},
};
use crate::utils::archive::{discover_documents, unpack_archive};

pub const REASON_NO_USABLE_TEXT: &str = "no usable text";

#[instrument(
    level = "trace",
    skip_all,
    fields(batch_id = %ctx.batch_id, tenant_id = %ctx.tenant_id)
)]
pub async fn unpack_and_discover(
    machine: ImportMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ImportMachine<(), Unpacked>, AppError> {
    let extracted_dir = ctx.scratch.extracted_dir();
    unpack_archive(&ctx.archive, &extracted_dir).await?;

    let discovered =
        tokio::task::spawn_blocking(move || discover_documents(&extracted_dir)).await?;
    let total_files = u32::try_from(discovered.len())
        .map_err(|_| AppError::Validation("archive contains too many documents".into()))?;
    ctx.batch = ctx.batch.record_discovery(total_files, ctx.db).await?;

    info!(
        batch_id = %ctx.batch_id,
        total_files,
        "discovered documents in archive"
    );

    if discovered.is_empty() {
        return Err(AppError::Validation(
            "archive contains no supported documents (pdf, doc, docx)".into(),
        ));
    }
    ctx.discovered = discovered;

    machine
        .unpack()
        .map_err(|(_, guard)| map_guard_error("unpack", guard))
}

/// Extract every discovered document and write one request line per usable text.
///
/// Extraction runs with bounded concurrency but results are consumed in discovery
/// order, so line indices are handed out serially and without gaps.
#[instrument(
    level = "trace",
    skip_all,
    fields(batch_id = %ctx.batch_id, tenant_id = %ctx.tenant_id)
)]
pub async fn build_requests(
    machine: ImportMachine<(), Unpacked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ImportMachine<(), RequestsBuilt>, AppError> {
    let concurrency = ctx.config.tuning.extraction_concurrency.max(1);
    let min_text_chars = ctx.config.tuning.min_text_chars;
    let discovered = std::mem::take(&mut ctx.discovered);

    let outcomes: Vec<_> = stream::iter(discovered)
        .map(|file| async move {
            let text = file.kind.extract_text(&file.path).await;
            (file, text)
        })
        .buffered(concurrency)
        .collect()
        .await;

    let mut request_body = String::new();
    let mut failures = Vec::new();

    for (file, outcome) in outcomes {
        match outcome {
            Ok(text) if text.trim().chars().count() >= min_text_chars => {
                let line_index = ctx.mapping.next_index()?;
                let line = ctx.provider.request_line(line_index, text.trim())?;
                request_body.push_str(&line);
                request_body.push('\n');
                ctx.mapping.push(file.filename.clone(), file.path)?;

                debug!(
                    batch_id = %ctx.batch_id,
                    %line_index,
                    filename = %file.filename,
                    text_chars = text.chars().count(),
                    "queued document for inference"
                );
            }
            Ok(text) => {
                warn!(
                    batch_id = %ctx.batch_id,
                    filename = %file.filename,
                    text_chars = text.trim().chars().count(),
                    "document has no usable text"
                );
                failures.push(FileIssue::extraction(file.filename, REASON_NO_USABLE_TEXT));
            }
            Err(err) => {
                warn!(
                    batch_id = %ctx.batch_id,
                    filename = %file.filename,
                    error = %err,
                    "document text extraction failed"
                );
                failures.push(FileIssue::extraction(file.filename, err.to_string()));
            }
        }
    }

    tokio::fs::write(ctx.scratch.request_file(), request_body).await?;
    ctx.mapping.persist(&ctx.scratch.mapping_file()).await?;

    let extracted_files = u32::try_from(ctx.mapping.len())
        .map_err(|_| AppError::Validation("too many files for one import batch".into()))?;
    let failed = failures.len();
    ctx.batch = ctx
        .batch
        .record_extraction(extracted_files, failures, ctx.db)
        .await?;

    info!(
        batch_id = %ctx.batch_id,
        extracted_files,
        failed,
        "built inference requests"
    );

    if ctx.mapping.is_empty() {
        return Err(AppError::Validation(
            "no document in the archive yielded usable text".into(),
        ));
    }

    machine
        .build()
        .map_err(|(_, guard)| map_guard_error("build", guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(batch_id = %ctx.batch_id, tenant_id = %ctx.tenant_id)
)]
pub async fn stage_request_file(
    machine: ImportMachine<(), RequestsBuilt>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ImportMachine<(), Staged>, AppError> {
    let input_uri = ctx
        .storage
        .put_file(&ctx.scratch.request_file(), &input_key(&ctx.batch_id))
        .await?;
    let output_uri = ctx.storage.uri_for(&output_prefix_key(&ctx.batch_id));

    debug!(batch_id = %ctx.batch_id, %input_uri, %output_uri, "staged request file");

    ctx.input_uri = Some(input_uri);
    ctx.output_uri = Some(output_uri);

    machine
        .stage()
        .map_err(|(_, guard)| map_guard_error("stage", guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(batch_id = %ctx.batch_id, tenant_id = %ctx.tenant_id)
)]
pub async fn submit_job(
    machine: ImportMachine<(), Staged>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ImportMachine<(), Submitted>, AppError> {
    let input_uri = ctx.input_uri()?.to_string();
    let output_uri = ctx.output_uri()?.to_string();
    let display_name = format!("import-batch-{}", ctx.batch_id);

    let job_id = ctx
        .provider
        .submit(&input_uri, &output_uri, &display_name)
        .await?;
    ctx.batch = ctx
        .batch
        .mark_submitted(input_uri, output_uri, job_id.clone(), ctx.db)
        .await?;

    info!(
        batch_id = %ctx.batch_id,
        external_job_id = %job_id,
        "inference job submitted"
    );

    machine
        .submit()
        .map_err(|(_, guard)| map_guard_error("submit", guard))
}

fn map_guard_error(stage: &'static str, err: GuardError) -> AppError {
    AppError::InternalError(format!(
        "import state machine rejected '{stage}': guard={}, event={}, kind={:?}",
        err.guard, err.event, err.kind
    ))
}
