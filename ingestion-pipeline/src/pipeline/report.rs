use chrono::{DateTime, Utc};
use common::storage::types::import_batch::{BatchStatus, FileIssue, ImportBatch};
use serde::Serialize;

/// Status view of a batch as returned to callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchStatusReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_files: u32,
    pub extracted_files: u32,
    pub processed_files: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub skipped_count: u32,
    pub extraction_failed_count: u32,
    pub progress_percentage: u32,
    pub is_complete: bool,
    pub error_message: Option<String>,
    pub failed_files: Vec<FileIssue>,
    pub skipped_files: Vec<FileIssue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ImportBatch> for BatchStatusReport {
    fn from(batch: ImportBatch) -> Self {
        Self {
            progress_percentage: batch.progress_percentage(),
            is_complete: batch.is_complete(),
            batch_id: batch.id,
            status: batch.status,
            total_files: batch.total_files,
            extracted_files: batch.extracted_files,
            processed_files: batch.processed_files,
            success_count: batch.success_count,
            failed_count: batch.failed_count,
            skipped_count: batch.skipped_count,
            extraction_failed_count: batch.extraction_failed_count,
            error_message: batch.error_message,
            failed_files: batch.failed_files,
            skipped_files: batch.skipped_files,
            created_at: batch.created_at,
            started_at: batch.started_at,
            completed_at: batch.completed_at,
        }
    }
}

/// Receipt returned once an archive has been extracted and submitted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub batch_id: String,
    pub total_files: u32,
}

impl From<&ImportBatch> for SubmissionReceipt {
    fn from(batch: &ImportBatch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            total_files: batch.total_files,
        }
    }
}
