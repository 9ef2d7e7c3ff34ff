use std::{
    fs::File,
    path::{Path, PathBuf},
};

use common::error::AppError;
use walkdir::{DirEntry, WalkDir};
use zip::ZipArchive;

use super::file_text_extraction::DocumentKind;

const MACOS_METADATA_DIR: &str = "__MACOSX";

/// An eligible document found in an unpacked archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub filename: String,
    pub kind: DocumentKind,
}

/// Unpack `archive_path` into `destination`. Entries that would escape the destination
/// are rejected by the zip reader.
pub async fn unpack_archive(archive_path: &Path, destination: &Path) -> Result<(), AppError> {
    let archive_path = archive_path.to_path_buf();
    let destination = destination.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        std::fs::create_dir_all(&destination)?;
        let file = File::open(&archive_path)?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| AppError::Validation(format!("archive could not be opened: {e}")))?;
        archive
            .extract(&destination)
            .map_err(|e| AppError::Validation(format!("archive could not be extracted: {e}")))?;
        Ok(())
    })
    .await?
}

fn is_hidden_or_metadata(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0 && (name.starts_with('.') || name == MACOS_METADATA_DIR)
}

/// Recursively list eligible documents below `root`, sorted by path so that line
/// index assignment is reproducible for the same archive.
pub fn discover_documents(root: &Path) -> Vec<DiscoveredFile> {
    let mut files: Vec<DiscoveredFile> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden_or_metadata(e))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let kind = DocumentKind::from_path(entry.path())?;
            Some(DiscoveredFile {
                filename: entry.file_name().to_string_lossy().into_owned(),
                path: entry.into_path(),
                kind,
            })
        })
        .collect();

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start file");
            writer.write_all(body).expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    #[tokio::test]
    async fn discovery_filters_extensions_hidden_and_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("upload.zip");
        write_zip(
            &archive,
            &[
                ("b.pdf", b"%PDF"),
                ("nested/a.DOCX", b"PK"),
                ("nested/old.doc", b"doc"),
                ("notes.txt", b"text"),
                (".hidden.pdf", b"%PDF"),
                ("__MACOSX/._b.pdf", b"meta"),
            ],
        );
        let extracted = dir.path().join("extracted");

        unpack_archive(&archive, &extracted).await.expect("unpack");
        let files = discover_documents(&extracted);

        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["b.pdf", "a.DOCX", "old.doc"]);
        assert_eq!(files[0].kind, DocumentKind::Pdf);
        assert_eq!(files[1].kind, DocumentKind::Docx);
        assert_eq!(files[2].kind, DocumentKind::Doc);
    }

    #[tokio::test]
    async fn corrupt_archive_is_a_validation_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"definitely not a zip").expect("write");

        let result = unpack_archive(&archive, &dir.path().join("out")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
