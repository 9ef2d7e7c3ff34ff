use std::path::Path;

use common::error::AppError;

use super::{
    pdf_ingestion::extract_pdf_text,
    word_extraction::{extract_doc_text, extract_docx_text},
};

/// Document formats accepted from uploaded archives, resolved once at discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Doc,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            "doc" => Some(DocumentKind::Doc),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Read the document's text. Runs the blocking parsers off the async executor.
    pub async fn extract_text(self, path: &Path) -> Result<String, AppError> {
        let bytes = tokio::fs::read(path).await?;
        let parser = match self {
            DocumentKind::Pdf => extract_pdf_text,
            DocumentKind::Docx => extract_docx_text,
            DocumentKind::Doc => extract_doc_text,
        };
        tokio::task::spawn_blocking(move || parser(&bytes)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping_is_case_insensitive() {
        assert_eq!(DocumentKind::from_extension("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_extension("Docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_extension("doc"), Some(DocumentKind::Doc));
        assert_eq!(DocumentKind::from_extension("txt"), None);
        assert_eq!(DocumentKind::from_path(Path::new("notes/cv.TXT")), None);
    }

    #[tokio::test]
    async fn corrupt_pdf_is_an_extraction_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.pdf");
        tokio::fs::write(&path, b"this is not a pdf at all").await.expect("write");

        let result = DocumentKind::Pdf.extract_text(&path).await;
        assert!(matches!(result, Err(AppError::Extraction(_))));
    }

    #[tokio::test]
    async fn corrupt_docx_is_an_extraction_error_not_empty_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.docx");
        tokio::fs::write(&path, b"garbage").await.expect("write");

        let result = DocumentKind::Docx.extract_text(&path).await;
        assert!(matches!(result, Err(AppError::Extraction(_))));

        let legacy = dir.path().join("old.doc");
        tokio::fs::write(&legacy, b"garbage").await.expect("write");
        assert!(DocumentKind::Doc.extract_text(&legacy).await.is_ok());
    }
}
