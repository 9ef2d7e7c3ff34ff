use std::{path::Path, sync::Arc};

use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            contact::{Contact, ContactOrigin, NewContact},
            contact_document::ContactDocument,
            import_batch::ImportBatch,
        },
    },
};
use tracing::debug;

use crate::types::LineIndex;

/// Contact persistence bound to a single tenant.
///
/// Every write made during reconciliation goes through one of these, so a batch can
/// only ever land contacts in the tenant it was created for.
#[derive(Clone)]
pub struct TenantStore {
    tenant_id: String,
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
}

impl TenantStore {
    pub fn new(tenant_id: impl Into<String>, db: Arc<SurrealDbClient>, storage: StorageManager) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            db,
            storage,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn verify_binding(&self, batch: &ImportBatch) -> Result<(), AppError> {
        if batch.tenant_id == self.tenant_id {
            Ok(())
        } else {
            Err(AppError::TenantMismatch {
                expected: batch.tenant_id.clone(),
                actual: self.tenant_id.clone(),
            })
        }
    }

    pub async fn find_duplicate(&self, fields: &NewContact) -> Result<Option<Contact>, AppError> {
        Contact::find_duplicate(
            &self.db,
            &self.tenant_id,
            &fields.first_name,
            &fields.last_name,
            fields.email.as_deref(),
        )
        .await
    }

    /// Contact created for this batch line by an earlier reconciliation pass.
    pub async fn find_imported(
        &self,
        batch_id: &str,
        line_index: LineIndex,
    ) -> Result<Option<Contact>, AppError> {
        Contact::find_by_origin(&self.db, &self.tenant_id, &origin(batch_id, line_index)).await
    }

    pub async fn create_contact(
        &self,
        batch_id: &str,
        line_index: LineIndex,
        fields: NewContact,
    ) -> Result<Contact, AppError> {
        let contact = Contact::new(
            self.tenant_id.clone(),
            Some(origin(batch_id, line_index)),
            fields,
        );
        self.db
            .store_item(contact.clone())
            .await?
            .ok_or_else(|| AppError::InternalError("contact insert returned nothing".into()))
    }

    /// Keep the reconciliation lease on `batch` alive.
    pub async fn renew_lease(&self, batch: &ImportBatch) -> Result<(), AppError> {
        batch.renew_lease(&self.db, chrono::Utc::now()).await?;
        Ok(())
    }

    /// Store `source` as the contact's CV and point `cv_url` at it.
    pub async fn attach_cv(
        &self,
        contact: &Contact,
        source: &Path,
        original_filename: &str,
    ) -> Result<ContactDocument, AppError> {
        let data = tokio::fs::read(source).await?;
        let file_size = u64::try_from(data.len()).unwrap_or(u64::MAX);
        let extension = Path::new(original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| "bin".to_string());
        let key = format!(
            "{}/contacts/{}/cv-{}.{extension}",
            self.tenant_id,
            contact.id,
            chrono::Utc::now().format("%Y-%m-%d-%H%M%S")
        );

        let storage_path = self.storage.put(&key, Bytes::from(data)).await?;
        let document = ContactDocument::new_cv(
            contact.id.clone(),
            original_filename.to_string(),
            storage_path,
            file_size,
        );
        self.db.store_item(document.clone()).await?;
        Contact::set_cv_url(&self.db, &contact.id, &document.download_path()).await?;

        debug!(
            tenant_id = %self.tenant_id,
            contact_id = %contact.id,
            document_id = %document.id,
            "attached cv to contact"
        );
        Ok(document)
    }
}

fn origin(batch_id: &str, line_index: LineIndex) -> ContactOrigin {
    ContactOrigin {
        batch_id: batch_id.to_string(),
        line: line_index.get(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn store(tenant: &str) -> TenantStore {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("memory db");
        TenantStore::new(tenant, Arc::new(db), StorageManager::memory())
    }

    #[tokio::test]
    async fn binding_rejects_foreign_batches() {
        let store = store("tenant-a").await;
        let own = ImportBatch::new("tenant-a".into(), "u".into());
        let foreign = ImportBatch::new("tenant-b".into(), "u".into());

        assert!(store.verify_binding(&own).is_ok());
        assert!(matches!(
            store.verify_binding(&foreign),
            Err(AppError::TenantMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn attached_cv_is_stored_and_linked() {
        let store = store("tenant-a").await;
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("jan.pdf");
        tokio::fs::write(&source, b"%PDF-1.4 fake").await.expect("write");

        let contact = store
            .create_contact(
                "batch-1",
                LineIndex::new(0),
                NewContact {
                    first_name: "Jan".into(),
                    last_name: "Jansen".into(),
                    ..Default::default()
                },
            )
            .await
            .expect("create");
        let document = store
            .attach_cv(&contact, &source, "Jan.PDF")
            .await
            .expect("attach");

        assert!(document
            .storage_path
            .starts_with(&format!("memory://tenant-a/contacts/{}/cv-", contact.id)));
        assert!(document.storage_path.ends_with(".pdf"));
        assert_eq!(document.file_size, 13);
        assert_eq!(
            store.storage.get(&document.storage_path).await.expect("get"),
            Bytes::from_static(b"%PDF-1.4 fake")
        );

        let reloaded: Contact = store
            .db
            .get_item(&contact.id)
            .await
            .expect("get")
            .expect("contact");
        assert_eq!(reloaded.cv_url, Some(document.download_path()));

        let imported = store
            .find_imported("batch-1", LineIndex::new(0))
            .await
            .expect("lookup")
            .expect("imported contact");
        assert_eq!(imported.id, contact.id);
        assert!(store
            .find_imported("batch-1", LineIndex::new(1))
            .await
            .expect("lookup")
            .is_none());
    }
}
