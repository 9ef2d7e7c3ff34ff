use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use ingestion_pipeline::SubmissionReceipt;
use tempfile::NamedTempFile;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError, middleware_tenant::TenantContext};

#[derive(Debug, TryFromMultipart)]
pub struct ImportParams {
    #[form_data(limit = "unlimited")]
    pub archive: FieldData<NamedTempFile>,
}

fn is_zip_upload(archive: &FieldData<NamedTempFile>) -> bool {
    let by_name = archive
        .metadata
        .file_name
        .as_deref()
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(".zip"));
    let by_type = archive.metadata.content_type.as_deref().is_some_and(|ct| {
        matches!(
            ct,
            "application/zip" | "application/x-zip-compressed" | "application/x-zip"
        )
    });
    by_name || by_type
}

/// Accept a zip of résumés, extract it and submit the inference job. Responds once
/// the job has been submitted. Failures after the batch was created report its id.
pub async fn submit_import(
    State(state): State<ApiState>,
    Extension(tenant): Extension<TenantContext>,
    TypedMultipart(input): TypedMultipart<ImportParams>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_zip_upload(&input.archive) {
        return Err(ApiError::ValidationError(
            "The uploaded file must be a zip archive".to_string(),
        ));
    }

    let archive_bytes = input
        .archive
        .contents
        .as_file()
        .metadata()
        .map(|m| m.len())
        .unwrap_or_default();
    info!(
        tenant_id = %tenant.tenant_id,
        user_id = %tenant.user_id,
        archive_bytes,
        filename = input.archive.metadata.file_name.as_deref().unwrap_or("unknown"),
        "Received import archive"
    );

    let batch = state
        .pipeline
        .create_batch(&tenant.tenant_id, &tenant.user_id)
        .await?;
    let batch_id = batch.id.clone();
    let batch = state
        .pipeline
        .process_archive(batch, input.archive.contents.path())
        .await
        .map_err(|err| ApiError::from(err).for_batch(batch_id))?;

    Ok((StatusCode::ACCEPTED, Json(SubmissionReceipt::from(&batch))))
}

pub async fn list_imports(
    State(state): State<ApiState>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<impl IntoResponse, ApiError> {
    let batches = state.pipeline.list_batches(&tenant.tenant_id).await?;
    Ok(Json(batches))
}

pub async fn get_import_status(
    State(state): State<ApiState>,
    Extension(tenant): Extension<TenantContext>,
    Path(batch_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.pipeline.status(&batch_id, &tenant.tenant_id).await?;
    Ok(Json(report))
}
