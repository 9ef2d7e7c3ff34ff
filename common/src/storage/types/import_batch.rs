use std::time::Duration;

use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const DEFAULT_LEASE_SECS: i64 = 600;
pub const RECENT_BATCH_LIMIT: usize = 20;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    #[default]
    Pending,
    Extracting,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Extracting => "extracting",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Pipeline stage that produced a per-file issue.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueStage {
    Extraction,
    Reconciliation,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FileIssue {
    pub filename: String,
    pub reason: String,
    pub stage: IssueStage,
}

impl FileIssue {
    pub fn extraction(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            reason: reason.into(),
            stage: IssueStage::Extraction,
        }
    }

    pub fn reconciliation(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            reason: reason.into(),
            stage: IssueStage::Reconciliation,
        }
    }
}

/// Final tallies written when a batch completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileTotals {
    pub success_count: u32,
    pub failed: Vec<FileIssue>,
    pub skipped: Vec<FileIssue>,
}

impl ReconcileTotals {
    pub fn processed(&self) -> u32 {
        let failed = u32::try_from(self.failed.len()).unwrap_or(u32::MAX);
        let skipped = u32::try_from(self.skipped.len()).unwrap_or(u32::MAX);
        self.success_count
            .saturating_add(failed)
            .saturating_add(skipped)
    }
}

#[derive(Debug, Clone, Copy)]
enum BatchTransition {
    StartExtraction,
    Discover,
    Extract,
    Submit,
    Complete,
    Fail,
}

impl BatchTransition {
    fn as_str(&self) -> &'static str {
        match self {
            BatchTransition::StartExtraction => "start_extraction",
            BatchTransition::Discover => "discover",
            BatchTransition::Extract => "extract",
            BatchTransition::Submit => "submit",
            BatchTransition::Complete => "complete",
            BatchTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: BatchLifecycleMachine,
        initial: Pending,
        states: [Pending, Extracting, Processing, Completed, Failed],
        events {
            start_extraction {
                transition: { from: Pending, to: Extracting }
            }
            submit {
                transition: { from: Extracting, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Completed }
            }
            fail {
                transition: { from: Pending, to: Failed }
                transition: { from: Extracting, to: Failed }
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> BatchLifecycleMachine<(), Pending> {
        BatchLifecycleMachine::new(())
    }

    pub(super) fn extracting() -> BatchLifecycleMachine<(), Extracting> {
        pending()
            .start_extraction()
            .expect("start_extraction transition from Pending should exist")
    }

    pub(super) fn processing() -> BatchLifecycleMachine<(), Processing> {
        extracting()
            .submit()
            .expect("submit transition from Extracting should exist")
    }
}

fn invalid_transition(state: BatchStatus, event: BatchTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid import batch transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: BatchStatus, event: BatchTransition) -> Result<BatchStatus, AppError> {
    use lifecycle::*;
    match (state, event) {
        (BatchStatus::Pending, BatchTransition::StartExtraction) => pending()
            .start_extraction()
            .map(|_| BatchStatus::Extracting)
            .map_err(|_| invalid_transition(state, event)),
        (BatchStatus::Extracting, BatchTransition::Submit) => extracting()
            .submit()
            .map(|_| BatchStatus::Processing)
            .map_err(|_| invalid_transition(state, event)),
        (BatchStatus::Processing, BatchTransition::Complete) => processing()
            .complete()
            .map(|_| BatchStatus::Completed)
            .map_err(|_| invalid_transition(state, event)),
        (BatchStatus::Pending, BatchTransition::Fail) => pending()
            .fail()
            .map(|_| BatchStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (BatchStatus::Extracting, BatchTransition::Fail) => extracting()
            .fail()
            .map(|_| BatchStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (BatchStatus::Processing, BatchTransition::Fail) => processing()
            .fail()
            .map(|_| BatchStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

stored_object!(ImportBatch, "import_batch", {
    tenant_id: String,
    user_id: String,
    status: BatchStatus,
    total_files: u32,
    extracted_files: u32,
    processed_files: u32,
    success_count: u32,
    failed_count: u32,
    skipped_count: u32,
    extraction_failed_count: u32,
    #[serde(default)]
    failed_files: Vec<FileIssue>,
    #[serde(default)]
    skipped_files: Vec<FileIssue>,
    input_uri: Option<String>,
    output_uri: Option<String>,
    external_job_id: Option<String>,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    lease_token: Option<String>
});

impl ImportBatch {
    pub fn new(tenant_id: String, user_id: String) -> Self {
        let now = chrono::Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            user_id,
            status: BatchStatus::Pending,
            total_files: 0,
            extracted_files: 0,
            processed_files: 0,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            extraction_failed_count: 0,
            failed_files: Vec::new(),
            skipped_files: Vec::new(),
            input_uri: None,
            output_uri: None,
            external_job_id: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            lease_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create_and_add_to_db(
        tenant_id: String,
        user_id: String,
        db: &SurrealDbClient,
    ) -> Result<ImportBatch, AppError> {
        let batch = Self::new(tenant_id, user_id);
        db.store_item(batch.clone()).await?;
        Ok(batch)
    }

    /// Rounded share of processed files, 0 when nothing was discovered.
    pub fn progress_percentage(&self) -> u32 {
        let total = u64::from(self.total_files);
        if total == 0 {
            return 0;
        }
        let scaled = u64::from(self.processed_files)
            .saturating_mul(100)
            .saturating_add(total / 2);
        let percentage = scaled.checked_div(total).unwrap_or(0).min(100);
        u32::try_from(percentage).unwrap_or(100)
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.lease_duration_secs).unwrap_or(0))
    }

    async fn apply_update(
        &self,
        db: &SurrealDbClient,
        query: &'static str,
        event: BatchTransition,
        bind: impl FnOnce(surrealdb::method::Query<'_, surrealdb::engine::any::Any>) -> surrealdb::method::Query<'_, surrealdb::engine::any::Any>,
    ) -> Result<ImportBatch, AppError> {
        self.run_update(db, query, bind)
            .await?
            .ok_or_else(|| invalid_transition(self.status, event))
    }

    async fn run_update(
        &self,
        db: &SurrealDbClient,
        query: &'static str,
        bind: impl FnOnce(surrealdb::method::Query<'_, surrealdb::engine::any::Any>) -> surrealdb::method::Query<'_, surrealdb::engine::any::Any>,
    ) -> Result<Option<ImportBatch>, AppError> {
        let now = chrono::Utc::now();
        let request = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("now", SurrealDatetime::from(now)));
        let mut result = bind(request).await?;

        Ok(result.take(0)?)
    }

    pub async fn start_extraction(&self, db: &SurrealDbClient) -> Result<ImportBatch, AppError> {
        let next = compute_next_state(self.status, BatchTransition::StartExtraction)?;

        const START_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $next,
                started_at = $now,
                updated_at = $now
            WHERE status = $current
            RETURN *;
        "#;

        self.apply_update(db, START_QUERY, BatchTransition::StartExtraction, |q| {
            q.bind(("next", next.as_str()))
                .bind(("current", BatchStatus::Pending.as_str()))
        })
        .await
    }

    /// Record how many eligible documents discovery found.
    pub async fn record_discovery(
        &self,
        total_files: u32,
        db: &SurrealDbClient,
    ) -> Result<ImportBatch, AppError> {
        const DISCOVERY_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET total_files = $total_files,
                updated_at = $now
            WHERE status = $extracting
            RETURN *;
        "#;

        self.apply_update(db, DISCOVERY_QUERY, BatchTransition::Discover, |q| {
            q.bind(("total_files", total_files))
                .bind(("extracting", BatchStatus::Extracting.as_str()))
        })
        .await
    }

    /// Record the outcome of the extraction stage. Extraction failures are mirrored
    /// into `failed_count` until reconciliation finalizes the counters.
    pub async fn record_extraction(
        &self,
        extracted_files: u32,
        failures: Vec<FileIssue>,
        db: &SurrealDbClient,
    ) -> Result<ImportBatch, AppError> {
        const EXTRACTION_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET extracted_files = $extracted_files,
                extraction_failed_count = $failed_count,
                failed_count = $failed_count,
                failed_files = $failed_files,
                updated_at = $now
            WHERE status = $extracting
            RETURN *;
        "#;

        let failed_count = u32::try_from(failures.len()).unwrap_or(u32::MAX);
        self.apply_update(db, EXTRACTION_QUERY, BatchTransition::Extract, |q| {
            q.bind(("extracted_files", extracted_files))
                .bind(("failed_count", failed_count))
                .bind(("failed_files", failures))
                .bind(("extracting", BatchStatus::Extracting.as_str()))
        })
        .await
    }

    pub async fn mark_submitted(
        &self,
        input_uri: String,
        output_uri: String,
        external_job_id: String,
        db: &SurrealDbClient,
    ) -> Result<ImportBatch, AppError> {
        let next = compute_next_state(self.status, BatchTransition::Submit)?;

        const SUBMIT_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $next,
                input_uri = $input_uri,
                output_uri = $output_uri,
                external_job_id = $external_job_id,
                updated_at = $now
            WHERE status = $current
            RETURN *;
        "#;

        self.apply_update(db, SUBMIT_QUERY, BatchTransition::Submit, |q| {
            q.bind(("next", next.as_str()))
                .bind(("current", BatchStatus::Extracting.as_str()))
                .bind(("input_uri", input_uri))
                .bind(("output_uri", output_uri))
                .bind(("external_job_id", external_job_id))
        })
        .await
    }

    /// Finalize counters and move to `completed`. `failed_files` keeps the
    /// extraction issues recorded earlier followed by the reconciliation issues.
    ///
    /// Only the holder of the reconciliation lease this snapshot was claimed with
    /// can complete the batch.
    pub async fn mark_completed(
        &self,
        totals: ReconcileTotals,
        db: &SurrealDbClient,
    ) -> Result<ImportBatch, AppError> {
        let next = compute_next_state(self.status, BatchTransition::Complete)?;

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $next,
                processed_files = $processed_files,
                success_count = $success_count,
                failed_count = $failed_count,
                skipped_count = $skipped_count,
                failed_files = $failed_files,
                skipped_files = $skipped_files,
                completed_at = $now,
                locked_at = NONE,
                lease_token = NONE,
                updated_at = $now
            WHERE status = $current AND lease_token = $lease_token
            RETURN *;
        "#;

        let processed_files = totals.processed();
        let failed_count = u32::try_from(totals.failed.len()).unwrap_or(u32::MAX);
        let skipped_count = u32::try_from(totals.skipped.len()).unwrap_or(u32::MAX);
        let failed_files: Vec<FileIssue> = self
            .failed_files
            .iter()
            .filter(|issue| issue.stage == IssueStage::Extraction)
            .cloned()
            .chain(totals.failed)
            .collect();

        let completed = self
            .run_update(db, COMPLETE_QUERY, |q| {
                q.bind(("next", next.as_str()))
                    .bind(("current", BatchStatus::Processing.as_str()))
                    .bind(("processed_files", processed_files))
                    .bind(("success_count", totals.success_count))
                    .bind(("failed_count", failed_count))
                    .bind(("skipped_count", skipped_count))
                    .bind(("failed_files", failed_files))
                    .bind(("skipped_files", totals.skipped))
                    .bind(("lease_token", self.lease_token.clone()))
            })
            .await?;

        // Either the lease moved on or the batch left `processing` under us.
        completed.ok_or_else(|| {
            AppError::LeaseLost(format!(
                "import batch {} is no longer held by this reconciliation",
                self.id
            ))
        })
    }

    /// Move any non-terminal batch to `failed` with a message.
    pub async fn mark_failed(
        &self,
        message: &str,
        db: &SurrealDbClient,
    ) -> Result<ImportBatch, AppError> {
        compute_next_state(self.status, BatchTransition::Fail)?;

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $failed,
                error_message = $error_message,
                completed_at = $now,
                locked_at = NONE,
                lease_token = NONE,
                updated_at = $now
            WHERE status IN $allow_states
            RETURN *;
        "#;

        let message = message.to_string();
        self.apply_update(db, FAIL_QUERY, BatchTransition::Fail, |q| {
            q.bind(("failed", BatchStatus::Failed.as_str()))
                .bind(("error_message", message))
                .bind((
                    "allow_states",
                    vec![
                        BatchStatus::Pending.as_str(),
                        BatchStatus::Extracting.as_str(),
                        BatchStatus::Processing.as_str(),
                    ],
                ))
        })
        .await
    }

    /// Operator override: force a `processing` batch to `failed`. Later polls skip it.
    pub async fn abandon(
        db: &SurrealDbClient,
        batch_id: &str,
        message: &str,
    ) -> Result<ImportBatch, AppError> {
        let batch = db
            .get_item::<ImportBatch>(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("import batch {batch_id}")))?;

        if batch.status != BatchStatus::Processing {
            return Err(invalid_transition(batch.status, BatchTransition::Fail));
        }

        batch.mark_failed(message, db).await
    }

    /// Take the reconciliation lease on a `processing` batch. Returns `None` when the
    /// batch is no longer processing or another invocation holds a live lease.
    ///
    /// The returned snapshot carries a fresh lease token; a holder whose lease
    /// expired and was taken over can no longer renew, release or complete.
    pub async fn claim_for_reconcile(
        db: &SurrealDbClient,
        batch_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<ImportBatch>, AppError> {
        const CLAIM_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET locked_at = $now,
                lease_duration_secs = $lease_secs,
                lease_token = $lease_token,
                updated_at = $now
            WHERE status = $processing
              AND (
                    locked_at = NONE
                    OR time::unix($now) - time::unix(locked_at) >= lease_duration_secs
              )
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", batch_id.to_string()))
            .bind(("processing", BatchStatus::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind((
                "lease_secs",
                i64::try_from(lease_duration.as_secs()).unwrap_or(DEFAULT_LEASE_SECS),
            ))
            .bind(("lease_token", Uuid::new_v4().to_string()))
            .await?;

        let batch: Option<ImportBatch> = result.take(0)?;
        Ok(batch)
    }

    /// Push the lease expiry forward. Fails with [`AppError::LeaseLost`] once
    /// another invocation has taken the lease over.
    pub async fn renew_lease(
        &self,
        db: &SurrealDbClient,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<ImportBatch, AppError> {
        const RENEW_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET locked_at = $now,
                updated_at = $now
            WHERE status = $processing AND lease_token = $lease_token
            RETURN *;
        "#;

        let Some(token) = self.lease_token.clone() else {
            return Err(AppError::LeaseLost(format!(
                "import batch {} was not claimed",
                self.id
            )));
        };

        let mut result = db
            .client
            .query(RENEW_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", BatchStatus::Processing.as_str()))
            .bind(("lease_token", token))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let renewed: Option<ImportBatch> = result.take(0)?;
        renewed.ok_or_else(|| {
            AppError::LeaseLost(format!(
                "reconciliation lease on import batch {} is held elsewhere",
                self.id
            ))
        })
    }

    /// Drop the reconciliation lease without changing status. A lease that has
    /// since been taken over is left alone.
    pub async fn release_lock(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        const RELEASE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET locked_at = NONE,
                lease_token = NONE,
                updated_at = $now
            WHERE status = $processing AND lease_token = $lease_token
            RETURN NONE;
        "#;

        db.client
            .query(RELEASE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", BatchStatus::Processing.as_str()))
            .bind(("lease_token", self.lease_token.clone()))
            .bind(("now", SurrealDatetime::from(chrono::Utc::now())))
            .await?
            .check()?;

        Ok(())
    }

    /// All batches awaiting their external job, across tenants.
    pub async fn get_processing(db: &SurrealDbClient) -> Result<Vec<ImportBatch>, AppError> {
        let batches: Vec<ImportBatch> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE status = $processing
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("processing", BatchStatus::Processing.as_str()))
            .await?
            .take(0)?;

        Ok(batches)
    }

    pub async fn list_for_tenant(
        db: &SurrealDbClient,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<ImportBatch>, AppError> {
        let batches: Vec<ImportBatch> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                 ORDER BY created_at DESC
                 LIMIT $limit",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(batches)
    }

    /// Fetch a batch only if it belongs to `tenant_id`.
    pub async fn get_for_tenant(
        db: &SurrealDbClient,
        batch_id: &str,
        tenant_id: &str,
    ) -> Result<Option<ImportBatch>, AppError> {
        let batch = db.get_item::<ImportBatch>(batch_id).await?;
        Ok(batch.filter(|b| b.tenant_id == tenant_id))
    }
}
