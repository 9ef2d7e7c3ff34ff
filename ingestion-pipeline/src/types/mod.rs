pub mod candidate_record;

use std::path::{Path, PathBuf};

use common::error::AppError;
use serde::{Deserialize, Serialize};

const CUSTOM_ID_PREFIX: &str = "line-";

/// Zero-based position of a record in the inference request and response streams.
///
/// Indices are only handed out by [`FileMappingTable::push`], which allocates them
/// contiguously, so a table with `n` entries always covers exactly `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineIndex(u32);

impl LineIndex {
    pub(crate) fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Identifier sent with the request line and echoed back by the provider.
    pub fn custom_id(self) -> String {
        format!("{CUSTOM_ID_PREFIX}{}", self.0)
    }

    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        custom_id
            .strip_prefix(CUSTOM_ID_PREFIX)
            .and_then(|raw| raw.parse::<u32>().ok())
            .map(Self)
    }
}

impl std::fmt::Display for LineIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMapping {
    pub line_index: LineIndex,
    pub filename: String,
    pub source_path: PathBuf,
}

/// Line index to source file table for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMappingTable {
    entries: Vec<FileMapping>,
}

impl FileMappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next pushed file will receive.
    pub fn next_index(&self) -> Result<LineIndex, AppError> {
        u32::try_from(self.entries.len())
            .map(LineIndex)
            .map_err(|_| AppError::Validation("too many files for one import batch".into()))
    }

    /// Append a file and return the line index it was assigned.
    pub fn push(&mut self, filename: String, source_path: PathBuf) -> Result<LineIndex, AppError> {
        let line_index = self.next_index()?;
        self.entries.push(FileMapping {
            line_index,
            filename,
            source_path,
        });
        Ok(line_index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileMapping> {
        self.entries.iter()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec_pretty(&self.entries)?)
    }

    /// Parse a persisted table, rejecting anything that is not gapless and zero-based.
    pub fn from_json(bytes: &[u8]) -> Result<Self, AppError> {
        let entries: Vec<FileMapping> = serde_json::from_slice(bytes)?;
        for (position, entry) in entries.iter().enumerate() {
            if usize::try_from(entry.line_index.0).ok() != Some(position) {
                return Err(AppError::Processing(format!(
                    "file mapping is not contiguous: entry {position} carries line index {}",
                    entry.line_index
                )));
            }
        }
        Ok(Self { entries })
    }

    pub async fn persist(&self, path: &Path) -> Result<(), AppError> {
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_json(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_contiguous_indices() {
        let mut table = FileMappingTable::new();
        let indices: Vec<u32> = ["a.pdf", "b.docx", "c.doc"]
            .iter()
            .map(|name| {
                table
                    .push((*name).to_string(), PathBuf::from(name))
                    .expect("push")
                    .get()
            })
            .collect();

        assert_eq!(indices, vec![0, 1, 2]);
        let second = table.iter().nth(1).expect("second entry");
        assert_eq!(second.line_index, LineIndex::new(1));
        assert_eq!(second.filename, "b.docx");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn custom_id_round_trips() {
        let idx = LineIndex::new(42);
        assert_eq!(idx.custom_id(), "line-42");
        assert_eq!(LineIndex::from_custom_id("line-42"), Some(idx));
        assert_eq!(LineIndex::from_custom_id("request-42"), None);
        assert_eq!(LineIndex::from_custom_id("line-x"), None);
    }

    #[test]
    fn persisted_table_with_gap_is_rejected() {
        let json = br#"[
            {"line_index": 0, "filename": "a.pdf", "source_path": "/tmp/a.pdf"},
            {"line_index": 2, "filename": "b.pdf", "source_path": "/tmp/b.pdf"}
        ]"#;
        assert!(matches!(
            FileMappingTable::from_json(json),
            Err(AppError::Processing(_))
        ));
    }

    #[tokio::test]
    async fn table_survives_disk_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("file_mapping.json");
        let mut table = FileMappingTable::new();
        table
            .push("a.pdf".into(), dir.path().join("a.pdf"))
            .expect("push");
        table
            .push("b.pdf".into(), dir.path().join("b.pdf"))
            .expect("push");

        table.persist(&path).await.expect("persist");
        let loaded = FileMappingTable::load(&path).await.expect("load");
        assert_eq!(loaded, table);
    }
}
