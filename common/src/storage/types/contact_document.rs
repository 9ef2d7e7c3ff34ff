use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Cv,
}

stored_object!(ContactDocument, "contact_document", {
    contact_id: String,
    kind: DocumentKind,
    original_filename: String,
    storage_path: String,
    mime_type: String,
    file_size: u64
});

impl ContactDocument {
    pub fn new_cv(
        contact_id: String,
        original_filename: String,
        storage_path: String,
        file_size: u64,
    ) -> Self {
        let now = chrono::Utc::now();
        let mime_type = mime_guess::from_path(&original_filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Self {
            id: Uuid::new_v4().to_string(),
            contact_id,
            kind: DocumentKind::Cv,
            original_filename,
            storage_path,
            mime_type,
            file_size,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn download_path(&self) -> String {
        format!("/contact-documents/{}/download", self.id)
    }

    pub async fn for_contact(
        db: &SurrealDbClient,
        contact_id: &str,
    ) -> Result<Vec<ContactDocument>, AppError> {
        let documents: Vec<ContactDocument> = db
            .query("SELECT * FROM type::table($table) WHERE contact_id = $contact_id")
            .bind(("table", Self::table_name()))
            .bind(("contact_id", contact_id.to_string()))
            .await?
            .take(0)?;

        Ok(documents)
    }
}
