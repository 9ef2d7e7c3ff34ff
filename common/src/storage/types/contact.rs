use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const CANDIDATE_ROLE: &str = "candidate";

/// Closed education level set used on contacts.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum Education {
    #[serde(rename = "MBO")]
    Mbo,
    #[serde(rename = "HBO")]
    Hbo,
    #[serde(rename = "UNI")]
    Uni,
}

impl Education {
    pub fn as_str(&self) -> &'static str {
        match self {
            Education::Mbo => "MBO",
            Education::Hbo => "HBO",
            Education::Uni => "UNI",
        }
    }

    /// Map a free-text education value onto the closed set. Unknown values yield `None`.
    pub fn from_free_text(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "MBO" => Some(Education::Mbo),
            "HBO" | "BACHELOR" | "HOGESCHOOL" => Some(Education::Hbo),
            "UNI" | "UNIVERSITEIT" | "UNIVERSITY" | "WO" | "MASTER" => Some(Education::Uni),
            _ => None,
        }
    }
}

stored_object!(Contact, "contact", {
    tenant_id: String,
    first_name: String,
    prefix: Option<String>,
    last_name: String,
    date_of_birth: Option<chrono::NaiveDate>,
    email: Option<String>,
    phone: Option<String>,
    location: Option<String>,
    education: Option<Education>,
    current_company: Option<String>,
    company_role: Option<String>,
    notes: Option<String>,
    #[serde(default)]
    network_roles: Vec<String>,
    cv_url: Option<String>,
    source_batch_id: Option<String>,
    source_line: Option<u32>,
    name_key: String,
    email_key: Option<String>
});

/// Fields for a contact about to be created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewContact {
    pub first_name: String,
    pub prefix: Option<String>,
    pub last_name: String,
    pub date_of_birth: Option<chrono::NaiveDate>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub education: Option<Education>,
    pub current_company: Option<String>,
    pub company_role: Option<String>,
    pub notes: Option<String>,
}

/// Import batch line a contact was created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactOrigin {
    pub batch_id: String,
    pub line: u32,
}

/// Lowercased first + last name, the part of the dedup key that is always present.
pub fn name_key(first_name: &str, last_name: &str) -> String {
    format!(
        "{} {}",
        first_name.trim().to_lowercase(),
        last_name.trim().to_lowercase()
    )
}

fn email_key(email: Option<&str>) -> Option<String> {
    email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

impl Contact {
    pub fn new(tenant_id: String, origin: Option<ContactOrigin>, fields: NewContact) -> Self {
        let now = chrono::Utc::now();
        let name_key = name_key(&fields.first_name, &fields.last_name);
        let email_key = email_key(fields.email.as_deref());
        let (source_batch_id, source_line) = match origin {
            Some(origin) => (Some(origin.batch_id), Some(origin.line)),
            None => (None, None),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            first_name: fields.first_name,
            prefix: fields.prefix,
            last_name: fields.last_name,
            date_of_birth: fields.date_of_birth,
            email: fields.email,
            phone: fields.phone,
            location: fields.location,
            education: fields.education,
            current_company: fields.current_company,
            company_role: fields.company_role,
            notes: fields.notes,
            network_roles: vec![CANDIDATE_ROLE.to_string()],
            cv_url: None,
            source_batch_id,
            source_line,
            name_key,
            email_key,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name including the prefix, e.g. "Jan van der Berg".
    pub fn full_name(&self) -> String {
        match self.prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{} {} {}", self.first_name, prefix, self.last_name),
            None => format!("{} {}", self.first_name, self.last_name),
        }
    }

    /// Find an existing contact in `tenant_id` with the same name, and the same
    /// email when one is given. Comparison is case-insensitive.
    pub async fn find_duplicate(
        db: &SurrealDbClient,
        tenant_id: &str,
        first_name: &str,
        last_name: &str,
        email: Option<&str>,
    ) -> Result<Option<Contact>, AppError> {
        let name_key = name_key(first_name, last_name);
        let mut response = match email_key(email) {
            Some(email_key) => {
                db.query(
                    "SELECT * FROM type::table($table)
                     WHERE tenant_id = $tenant_id AND name_key = $name_key AND email_key = $email_key
                     LIMIT 1",
                )
                .bind(("table", Self::table_name()))
                .bind(("tenant_id", tenant_id.to_string()))
                .bind(("name_key", name_key))
                .bind(("email_key", email_key))
                .await?
            }
            None => {
                db.query(
                    "SELECT * FROM type::table($table)
                     WHERE tenant_id = $tenant_id AND name_key = $name_key
                     LIMIT 1",
                )
                .bind(("table", Self::table_name()))
                .bind(("tenant_id", tenant_id.to_string()))
                .bind(("name_key", name_key))
                .await?
            }
        };

        let found: Vec<Contact> = response.take(0)?;
        Ok(found.into_iter().next())
    }

    /// The contact an earlier pass over the same batch line created, if any.
    pub async fn find_by_origin(
        db: &SurrealDbClient,
        tenant_id: &str,
        origin: &ContactOrigin,
    ) -> Result<Option<Contact>, AppError> {
        let found: Vec<Contact> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                   AND source_batch_id = $batch_id
                   AND source_line = $line
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("batch_id", origin.batch_id.clone()))
            .bind(("line", origin.line))
            .await?
            .take(0)?;

        Ok(found.into_iter().next())
    }

    pub async fn set_cv_url(
        db: &SurrealDbClient,
        contact_id: &str,
        cv_url: &str,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing($table, $id)
             SET cv_url = $cv_url, updated_at = time::now()
             RETURN NONE",
        )
        .bind(("table", Self::table_name()))
        .bind(("id", contact_id.to_string()))
        .bind(("cv_url", cv_url.to_string()))
        .await?
        .check()?;

        Ok(())
    }

    pub async fn list_for_tenant(
        db: &SurrealDbClient,
        tenant_id: &str,
    ) -> Result<Vec<Contact>, AppError> {
        let contacts: Vec<Contact> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE tenant_id = $tenant_id
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await?
            .take(0)?;

        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    fn fields(first: &str, last: &str, email: Option<&str>) -> NewContact {
        NewContact {
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn education_synonyms_collapse() {
        assert_eq!(Education::from_free_text("universiteit"), Some(Education::Uni));
        assert_eq!(Education::from_free_text("WO"), Some(Education::Uni));
        assert_eq!(Education::from_free_text("master"), Some(Education::Uni));
        assert_eq!(Education::from_free_text(" Hogeschool "), Some(Education::Hbo));
        assert_eq!(Education::from_free_text("mbo"), Some(Education::Mbo));
        assert_eq!(Education::from_free_text("PhD in astrophysics"), None);
    }

    #[test]
    fn full_name_includes_prefix() {
        let mut contact = Contact::new("t".into(), None, fields("Jan", "Berg", None));
        assert_eq!(contact.full_name(), "Jan Berg");
        contact.prefix = Some("van der".into());
        assert_eq!(contact.full_name(), "Jan van der Berg");
        assert_eq!(contact.network_roles, vec!["candidate".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_lookup_is_case_insensitive_and_tenant_scoped() {
        let db = memory_db().await;
        let contact = Contact::new(
            "tenant-a".into(),
            None,
            fields("Anna", "Jansen", Some("Anna@Example.com")),
        );
        db.store_item(contact.clone()).await.expect("store");

        let hit = Contact::find_duplicate(&db, "tenant-a", "ANNA", "jansen", Some("anna@example.com"))
            .await
            .expect("query");
        assert_eq!(hit.map(|c| c.id), Some(contact.id.clone()));

        let name_only = Contact::find_duplicate(&db, "tenant-a", "anna", "Jansen", None)
            .await
            .expect("query");
        assert!(name_only.is_some());

        let other_email =
            Contact::find_duplicate(&db, "tenant-a", "Anna", "Jansen", Some("other@example.com"))
                .await
                .expect("query");
        assert!(other_email.is_none());

        let other_tenant = Contact::find_duplicate(&db, "tenant-b", "Anna", "Jansen", None)
            .await
            .expect("query");
        assert!(other_tenant.is_none());
    }

    #[tokio::test]
    async fn origin_lookup_matches_batch_and_line() {
        let db = memory_db().await;
        let origin = ContactOrigin {
            batch_id: "batch-1".into(),
            line: 3,
        };
        let contact = Contact::new(
            "tenant-a".into(),
            Some(origin.clone()),
            fields("Maria", "Bakker", None),
        );
        db.store_item(contact.clone()).await.expect("store");

        let hit = Contact::find_by_origin(&db, "tenant-a", &origin)
            .await
            .expect("query");
        assert_eq!(hit.map(|c| c.id), Some(contact.id));

        let other_line = ContactOrigin {
            batch_id: "batch-1".into(),
            line: 4,
        };
        assert!(Contact::find_by_origin(&db, "tenant-a", &other_line)
            .await
            .expect("query")
            .is_none());
        assert!(Contact::find_by_origin(&db, "tenant-b", &origin)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn cv_url_is_updated_in_place() {
        let db = memory_db().await;
        let contact = Contact::new("t".into(), None, fields("Piet", "Bakker", None));
        db.store_item(contact.clone()).await.expect("store");

        Contact::set_cv_url(&db, &contact.id, "/contact-documents/d1/download")
            .await
            .expect("update");

        let stored = db
            .get_item::<Contact>(&contact.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(
            stored.cv_url.as_deref(),
            Some("/contact-documents/d1/download")
        );
    }
}
