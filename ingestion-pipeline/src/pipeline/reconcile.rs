use std::{collections::BTreeMap, time::Instant};

use common::{
    error::AppError,
    storage::{
        store::StorageManager,
        types::{
            contact::Contact,
            import_batch::{FileIssue, ImportBatch, ReconcileTotals},
        },
    },
};
use tracing::{debug, info, instrument, warn};

use super::{
    services::{InferenceProvider, OutputRecord},
    tenant::TenantStore,
};
use crate::{
    types::{
        candidate_record::{parse_response, ParsedResponse},
        FileMapping, FileMappingTable, LineIndex,
    },
    utils::normalize::to_new_contact,
};

pub const REASON_NO_RESPONSE: &str = "no response";
pub const REASON_MALFORMED: &str = "malformed response";
pub const REASON_DUPLICATE: &str = "duplicate";

const SHARD_SUFFIX: &str = ".jsonl";

/// Result of reconciling a single mapped line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Success { contact_id: String },
    Failed(String),
    Skipped(String),
}

/// Turns provider output into contacts for one batch.
pub struct Reconciler<'a> {
    provider: &'a dyn InferenceProvider,
    storage: &'a StorageManager,
    store: &'a TenantStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        provider: &'a dyn InferenceProvider,
        storage: &'a StorageManager,
        store: &'a TenantStore,
    ) -> Self {
        Self {
            provider,
            storage,
            store,
        }
    }

    #[instrument(skip_all, fields(batch_id = %batch.id, tenant_id = %batch.tenant_id))]
    pub async fn reconcile(
        &self,
        batch: &ImportBatch,
        mapping: &FileMappingTable,
    ) -> Result<ReconcileTotals, AppError> {
        self.store.verify_binding(batch)?;

        let output_uri = batch.output_uri.as_deref().ok_or_else(|| {
            AppError::Processing("batch has no output location recorded".into())
        })?;
        let mut responses = self.collect_responses(output_uri).await?;

        // A claimed batch keeps its lease alive while lines are worked through.
        let renew_every = batch.lease_duration() / 3;
        let mut last_renewal = Instant::now();

        let mut totals = ReconcileTotals::default();
        for entry in mapping.iter() {
            if batch.lease_token.is_some() && last_renewal.elapsed() >= renew_every {
                self.store.renew_lease(batch).await?;
                last_renewal = Instant::now();
            }

            let record = responses.remove(&entry.line_index);
            match self.reconcile_line(batch, entry, record).await? {
                LineOutcome::Success { contact_id } => {
                    debug!(
                        line_index = %entry.line_index,
                        filename = %entry.filename,
                        %contact_id,
                        "created contact"
                    );
                    totals.success_count = totals.success_count.saturating_add(1);
                }
                LineOutcome::Failed(reason) => {
                    debug!(line_index = %entry.line_index, filename = %entry.filename, %reason, "line failed");
                    totals
                        .failed
                        .push(FileIssue::reconciliation(entry.filename.clone(), reason));
                }
                LineOutcome::Skipped(reason) => {
                    debug!(line_index = %entry.line_index, filename = %entry.filename, %reason, "line skipped");
                    totals
                        .skipped
                        .push(FileIssue::reconciliation(entry.filename.clone(), reason));
                }
            }
        }

        if !responses.is_empty() {
            warn!(
                unmapped = responses.len(),
                "provider output contained line indices with no mapped file"
            );
        }

        info!(
            success = totals.success_count,
            failed = totals.failed.len(),
            skipped = totals.skipped.len(),
            "reconciliation finished"
        );
        Ok(totals)
    }

    /// Read every output shard and key its records by line index.
    ///
    /// Records that echo their index are placed by it regardless of shard. Records
    /// without one fall back to their line position, which is only meaningful when
    /// the output is a single shard.
    async fn collect_responses(
        &self,
        output_uri: &str,
    ) -> Result<BTreeMap<LineIndex, OutputRecord>, AppError> {
        let shards: Vec<String> = self
            .storage
            .list(output_uri)
            .await?
            .into_iter()
            .filter(|uri| uri.ends_with(SHARD_SUFFIX))
            .collect();

        if shards.is_empty() {
            return Err(AppError::Processing(
                "inference job produced no output files".into(),
            ));
        }

        let single_shard = shards.len() == 1;
        let mut responses = BTreeMap::new();

        for shard in &shards {
            let content = self.storage.get(shard).await?;
            let content = String::from_utf8_lossy(&content);

            for (position, raw) in content.trim().lines().enumerate() {
                if raw.trim().is_empty() {
                    continue;
                }
                let record = match self.provider.parse_output_line(raw) {
                    Ok(record) => record,
                    Err(err) => {
                        debug!(%shard, position, error = %err, "skipping unreadable output line");
                        continue;
                    }
                };

                let line_index = match record.line_index {
                    Some(index) => index,
                    None if single_shard => LineIndex::new(u32::try_from(position).map_err(
                        |_| AppError::Processing("output shard has too many lines".into()),
                    )?),
                    None => {
                        return Err(AppError::Processing(format!(
                            "output is split across {} files but a record in {shard} carries no line index",
                            shards.len()
                        )));
                    }
                };

                responses.entry(line_index).or_insert(record);
            }
        }

        Ok(responses)
    }

    async fn reconcile_line(
        &self,
        batch: &ImportBatch,
        entry: &FileMapping,
        record: Option<OutputRecord>,
    ) -> Result<LineOutcome, AppError> {
        let Some(record) = record else {
            return Ok(LineOutcome::Failed(REASON_NO_RESPONSE.to_string()));
        };
        let Some(text) = record.text.filter(|t| !t.trim().is_empty()) else {
            return Ok(LineOutcome::Failed(match record.error {
                Some(error) => format!("{REASON_NO_RESPONSE}: {error}"),
                None => REASON_NO_RESPONSE.to_string(),
            }));
        };

        let candidate = match parse_response(&text) {
            ParsedResponse::Candidate(candidate) => candidate,
            ParsedResponse::NotFound(reason) => return Ok(LineOutcome::Failed(reason)),
            ParsedResponse::Malformed => {
                return Ok(LineOutcome::Failed(REASON_MALFORMED.to_string()))
            }
        };

        // A retried pass finds the contacts it created for these lines last time.
        if let Some(imported) = self.store.find_imported(&batch.id, entry.line_index).await? {
            debug!(
                filename = %entry.filename,
                contact_id = %imported.id,
                "line was imported by an earlier pass"
            );
            if imported.cv_url.is_none() {
                self.attach_cv(&imported, entry).await;
            }
            return Ok(LineOutcome::Success {
                contact_id: imported.id,
            });
        }

        let fields = to_new_contact(candidate);
        if let Some(existing) = self.store.find_duplicate(&fields).await? {
            debug!(
                filename = %entry.filename,
                existing_contact = %existing.id,
                "candidate already exists"
            );
            return Ok(LineOutcome::Skipped(REASON_DUPLICATE.to_string()));
        }

        let contact = match self
            .store
            .create_contact(&batch.id, entry.line_index, fields)
            .await
        {
            Ok(contact) => contact,
            Err(err) => {
                warn!(filename = %entry.filename, error = %err, "failed to create contact");
                return Ok(LineOutcome::Failed(format!("database error: {err}")));
            }
        };

        self.attach_cv(&contact, entry).await;

        Ok(LineOutcome::Success {
            contact_id: contact.id,
        })
    }

    async fn attach_cv(&self, contact: &Contact, entry: &FileMapping) {
        if let Err(err) = self
            .store
            .attach_cv(contact, &entry.source_path, &entry.filename)
            .await
        {
            warn!(
                filename = %entry.filename,
                contact_id = %contact.id,
                error = %err,
                "failed to attach cv to contact"
            );
        }
    }
}
