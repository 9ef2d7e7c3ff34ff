use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Text extraction error: {0}")]
    Extraction(String),
    #[error("Tenant mismatch: batch belongs to {expected}, store is bound to {actual}")]
    TenantMismatch { expected: String, actual: String },
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Reconciliation lease lost: {0}")]
    LeaseLost(String),
    #[error("Import processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Errors that will not go away by retrying the same batch on a later poll.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::Processing(_)
                | AppError::LLMParsing(_)
                | AppError::TenantMismatch { .. }
                | AppError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(AppError::Processing("mapping missing".into()).is_batch_fatal());
        assert!(AppError::TenantMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_batch_fatal());
        assert!(!AppError::Io(std::io::Error::other("disk hiccup")).is_batch_fatal());
        assert!(!AppError::InternalError("lock".into()).is_batch_fatal());
        assert!(!AppError::LeaseLost("taken over".into()).is_batch_fatal());
    }
}
