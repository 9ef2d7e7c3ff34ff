use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        BatchCompletionWindow, BatchEndpoint, BatchRequestArgs, BatchStatus as ProviderBatchStatus,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, CreateFileRequestArgs, FileInput, FilePurpose,
        ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::{error::AppError, storage::store::StorageManager};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::config::ImportTuning;
use crate::{
    types::LineIndex,
    utils::llm_instructions::{
        build_user_message, get_candidate_schema, CV_EXTRACTION_SYSTEM_MESSAGE,
    },
};

/// State reported by the external batch-inference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalJobState {
    Queued,
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Expired,
}

/// What the pipeline does in response to an external state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Reconcile,
    Fail,
    Wait,
}

impl ExternalJobState {
    pub fn action(self) -> JobAction {
        match self {
            ExternalJobState::Succeeded => JobAction::Reconcile,
            ExternalJobState::Failed | ExternalJobState::Cancelled | ExternalJobState::Expired => {
                JobAction::Fail
            }
            ExternalJobState::Queued | ExternalJobState::Pending | ExternalJobState::Running => {
                JobAction::Wait
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExternalJobState::Queued => "queued",
            ExternalJobState::Pending => "pending",
            ExternalJobState::Running => "running",
            ExternalJobState::Succeeded => "succeeded",
            ExternalJobState::Failed => "failed",
            ExternalJobState::Cancelled => "cancelled",
            ExternalJobState::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: ExternalJobState,
    pub error: Option<String>,
}

/// One line of provider output, reduced to what reconciliation needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputRecord {
    /// Index echoed back by the provider, when it does so.
    pub line_index: Option<LineIndex>,
    pub text: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Serialize one request line for the staged request file.
    fn request_line(&self, line_index: LineIndex, document_text: &str) -> Result<String, AppError>;

    /// Start a job reading `input_uri`; returns the provider's job id.
    async fn submit(
        &self,
        input_uri: &str,
        output_prefix: &str,
        display_name: &str,
    ) -> Result<String, AppError>;

    async fn poll(&self, job_id: &str) -> Result<JobStatus, AppError>;

    /// Make the job's output shards readable under `output_prefix`. Providers that
    /// write there themselves can leave this as a no-op.
    async fn collect_outputs(&self, job_id: &str, output_prefix: &str) -> Result<(), AppError>;

    /// Decode one raw output line.
    fn parse_output_line(&self, raw: &str) -> Result<OutputRecord, AppError>;
}

/// Provider backed by the OpenAI Batch API. Request lines are chat-completion calls
/// keyed by `custom_id = line-{n}`.
pub struct OpenAiBatchProvider {
    client: Arc<Client<OpenAIConfig>>,
    storage: StorageManager,
    model: String,
    tuning: ImportTuning,
}

impl OpenAiBatchProvider {
    pub fn new(
        client: Arc<Client<OpenAIConfig>>,
        storage: StorageManager,
        model: String,
        tuning: ImportTuning,
    ) -> Self {
        Self {
            client,
            storage,
            model,
            tuning,
        }
    }
}

#[derive(Deserialize)]
struct BatchOutputLine {
    custom_id: Option<String>,
    response: Option<BatchOutputResponse>,
    error: Option<BatchOutputError>,
}

#[derive(Deserialize)]
struct BatchOutputResponse {
    status_code: u16,
    #[serde(default)]
    body: Value,
}

#[derive(Deserialize)]
struct BatchOutputError {
    code: Option<String>,
    message: Option<String>,
}

fn map_provider_status(status: &ProviderBatchStatus) -> ExternalJobState {
    match status {
        ProviderBatchStatus::Validating => ExternalJobState::Queued,
        ProviderBatchStatus::InProgress
        | ProviderBatchStatus::Finalizing
        | ProviderBatchStatus::Cancelling => ExternalJobState::Running,
        ProviderBatchStatus::Completed => ExternalJobState::Succeeded,
        ProviderBatchStatus::Failed => ExternalJobState::Failed,
        ProviderBatchStatus::Expired => ExternalJobState::Expired,
        ProviderBatchStatus::Cancelled => ExternalJobState::Cancelled,
    }
}

fn output_key(prefix_key: &str, name: &str) -> String {
    format!("{}/{name}", prefix_key.trim_end_matches('/'))
}

#[async_trait]
impl InferenceProvider for OpenAiBatchProvider {
    fn request_line(&self, line_index: LineIndex, document_text: &str) -> Result<String, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Candidate details extracted from a résumé".into()),
                name: "candidate_extraction".into(),
                schema: Some(get_candidate_schema()),
                strict: Some(false),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.tuning.temperature)
            .max_completion_tokens(self.tuning.max_output_tokens)
            .messages([
                ChatCompletionRequestSystemMessage::from(CV_EXTRACTION_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(build_user_message(document_text)).into(),
            ])
            .response_format(response_format)
            .build()?;

        let line = json!({
            "custom_id": line_index.custom_id(),
            "method": "POST",
            "url": "/v1/chat/completions",
            "body": request,
        });
        Ok(serde_json::to_string(&line)?)
    }

    async fn submit(
        &self,
        input_uri: &str,
        _output_prefix: &str,
        display_name: &str,
    ) -> Result<String, AppError> {
        let payload = self.storage.get(input_uri).await?;
        let file_request = CreateFileRequestArgs::default()
            .file(FileInput::from_vec_u8(
                format!("{display_name}.jsonl"),
                payload.to_vec(),
            ))
            .purpose(FilePurpose::Batch)
            .build()?;
        let uploaded = self.client.files().create(file_request).await?;

        let batch_request = BatchRequestArgs::default()
            .input_file_id(uploaded.id.clone())
            .endpoint(BatchEndpoint::V1ChatCompletions)
            .completion_window(BatchCompletionWindow::W24H)
            .build()?;
        let job = self.client.batches().create(batch_request).await?;

        info!(
            job_id = %job.id,
            input_file_id = %uploaded.id,
            display_name,
            "submitted inference batch job"
        );
        Ok(job.id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, AppError> {
        let job = self.client.batches().retrieve(job_id).await?;
        let state = map_provider_status(&job.status);
        let error = job
            .errors
            .as_ref()
            .map(|errors| {
                errors
                    .data
                    .iter()
                    .map(|e| e.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|msg| !msg.is_empty());

        debug!(job_id, state = state.as_str(), ?error, "polled inference batch job");
        Ok(JobStatus { state, error })
    }

    async fn collect_outputs(&self, job_id: &str, output_prefix: &str) -> Result<(), AppError> {
        let job = self.client.batches().retrieve(job_id).await?;
        let prefix_key = self.storage.key_from_uri(output_prefix)?;

        for (file_id, name) in [
            (job.output_file_id.as_deref(), "output.jsonl"),
            (job.error_file_id.as_deref(), "errors.jsonl"),
        ] {
            let Some(file_id) = file_id else {
                continue;
            };
            let content: Bytes = self.client.files().content(file_id).await?;
            self.storage
                .put(&output_key(&prefix_key, name), content)
                .await?;
        }

        Ok(())
    }

    fn parse_output_line(&self, raw: &str) -> Result<OutputRecord, AppError> {
        let line: BatchOutputLine = serde_json::from_str(raw)?;
        let line_index = line.custom_id.as_deref().and_then(LineIndex::from_custom_id);

        let mut error = line.error.map(|e| {
            e.message
                .or(e.code)
                .unwrap_or_else(|| "provider reported an error".to_string())
        });

        let text = match line.response {
            Some(response) if response.status_code < 400 => response
                .body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            Some(response) => {
                error = error.or_else(|| {
                    response
                        .body
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| Some(format!("status {}", response.status_code)))
                });
                None
            }
            None => None,
        };

        Ok(OutputRecord {
            line_index,
            text,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiBatchProvider {
        OpenAiBatchProvider::new(
            Arc::new(Client::with_config(OpenAIConfig::new().with_api_key("test"))),
            StorageManager::memory(),
            "gpt-4o-mini".into(),
            ImportTuning::default(),
        )
    }

    #[test]
    fn state_actions() {
        assert_eq!(ExternalJobState::Succeeded.action(), JobAction::Reconcile);
        for state in [
            ExternalJobState::Failed,
            ExternalJobState::Cancelled,
            ExternalJobState::Expired,
        ] {
            assert_eq!(state.action(), JobAction::Fail);
        }
        for state in [
            ExternalJobState::Queued,
            ExternalJobState::Pending,
            ExternalJobState::Running,
        ] {
            assert_eq!(state.action(), JobAction::Wait);
        }
    }

    #[test]
    fn request_line_carries_custom_id_and_document() {
        let line = provider()
            .request_line(LineIndex::new(3), "Jan Jansen, developer")
            .expect("request line");
        let value: Value = serde_json::from_str(&line).expect("json");

        assert_eq!(value["custom_id"], "line-3");
        assert_eq!(value["url"], "/v1/chat/completions");
        assert_eq!(value["body"]["model"], "gpt-4o-mini");
        let user = value["body"]["messages"][1]["content"]
            .as_str()
            .expect("user content");
        assert!(user.contains("Jan Jansen, developer"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn successful_output_line_is_decoded() {
        let raw = r#"{"id":"r1","custom_id":"line-7","response":{"status_code":200,"body":{"choices":[{"message":{"content":"{\"first_name\":\"Anna\"}"}}]}},"error":null}"#;
        let record = provider().parse_output_line(raw).expect("parse");

        assert_eq!(record.line_index, Some(LineIndex::new(7)));
        assert_eq!(record.text.as_deref(), Some(r#"{"first_name":"Anna"}"#));
        assert!(record.error.is_none());
    }

    #[test]
    fn failed_output_line_carries_error() {
        let raw = r#"{"custom_id":"line-1","response":{"status_code":429,"body":{"error":{"message":"rate limited"}}},"error":null}"#;
        let record = provider().parse_output_line(raw).expect("parse");

        assert_eq!(record.line_index, Some(LineIndex::new(1)));
        assert!(record.text.is_none());
        assert_eq!(record.error.as_deref(), Some("rate limited"));

        let raw = r#"{"custom_id":"line-2","response":null,"error":{"code":"batch_expired","message":null}}"#;
        let record = provider().parse_output_line(raw).expect("parse");
        assert_eq!(record.error.as_deref(), Some("batch_expired"));
    }

    #[test]
    fn status_mapping_covers_provider_states() {
        assert_eq!(
            map_provider_status(&ProviderBatchStatus::Finalizing),
            ExternalJobState::Running
        );
        assert_eq!(
            map_provider_status(&ProviderBatchStatus::Completed),
            ExternalJobState::Succeeded
        );
        assert_eq!(
            map_provider_status(&ProviderBatchStatus::Expired),
            ExternalJobState::Expired
        );
    }
}
