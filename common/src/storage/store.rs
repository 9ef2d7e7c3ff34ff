use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use tracing::debug;

use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// Object storage facade used for staging request files, reading provider output
/// and keeping attached documents.
///
/// Locations handed out to callers are URIs (`local://key`, `memory://key`,
/// `s3://bucket/key`); every read accepts either a URI or a bare key.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    bucket: Option<String>,
}

impl StorageManager {
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let store = create_storage_backend(cfg).await?;
        debug!(backend = ?backend_kind, "storage backend initialized");

        Ok(Self {
            store,
            backend_kind,
            bucket: cfg.s3_bucket.clone(),
        })
    }

    /// Wrap an existing backend. Used by tests to share one `InMemory` store.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            bucket: None,
        }
    }

    pub fn memory() -> Self {
        Self::with_backend(Arc::new(InMemory::new()), StorageKind::Memory)
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    fn scheme_prefix(&self) -> String {
        match self.backend_kind {
            StorageKind::Local => "local://".to_string(),
            StorageKind::Memory => "memory://".to_string(),
            StorageKind::S3 => format!("s3://{}/", self.bucket.as_deref().unwrap_or_default()),
        }
    }

    /// Build the URI under which `key` is addressable in this backend.
    pub fn uri_for(&self, key: &str) -> String {
        format!("{}{}", self.scheme_prefix(), key.trim_start_matches('/'))
    }

    /// Strip this backend's scheme from a URI; bare keys pass through.
    pub fn key_from_uri(&self, location: &str) -> object_store::Result<String> {
        if !location.contains("://") {
            return Ok(location.to_string());
        }

        location
            .strip_prefix(&self.scheme_prefix())
            .map(str::to_string)
            .ok_or_else(|| object_store::Error::Generic {
                store: "StorageManager",
                source: format!("location {location} does not belong to this storage backend")
                    .into(),
            })
    }

    /// Store bytes under `key` and return its URI.
    pub async fn put(&self, key: &str, data: Bytes) -> object_store::Result<String> {
        let path = ObjPath::from(key);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await?;
        Ok(self.uri_for(key))
    }

    /// Upload a local file under `key` and return its URI.
    pub async fn put_file(&self, local_path: &Path, key: &str) -> object_store::Result<String> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| object_store::Error::Generic {
                store: "StorageManager",
                source: e.into(),
            })?;
        self.put(key, Bytes::from(data)).await
    }

    /// Retrieve the full contents at a URI or key.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let key = self.key_from_uri(location)?;
        let result = self.store.get(&ObjPath::from(key)).await?;
        result.bytes().await
    }

    /// List URIs below a prefix, ordered by key.
    pub async fn list(&self, prefix: &str) -> object_store::Result<Vec<String>> {
        let key = self.key_from_uri(prefix)?;
        let prefix_path = ObjPath::from(key);
        let mut locations: Vec<String> = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        locations.sort();

        Ok(locations.iter().map(|key| self.uri_for(key)).collect())
    }

    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let key = self.key_from_uri(location)?;
        self.store
            .head(&ObjPath::from(key))
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Delete all objects below the specified prefix.
    pub async fn delete_prefix(&self, prefix: &str) -> object_store::Result<()> {
        let key = self.key_from_uri(prefix)?;
        let prefix_path = ObjPath::from(key);
        let locations = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|m| m.location)
            .boxed();
        self.store
            .delete_stream(locations)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(())
    }
}

fn resolve_base_dir(cfg: &AppConfig) -> PathBuf {
    Path::new(&cfg.data_dir).join("objects")
}

async fn create_storage_backend(cfg: &AppConfig) -> object_store::Result<DynStore> {
    match cfg.storage {
        StorageKind::Local => {
            let base = resolve_base_dir(cfg);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base)?;
            Ok(Arc::new(store))
        }
        StorageKind::Memory => Ok(Arc::new(InMemory::new())),
        StorageKind::S3 => {
            let bucket = cfg
                .s3_bucket
                .as_deref()
                .ok_or_else(|| object_store::Error::Generic {
                    store: "S3",
                    source: "s3_bucket must be configured for s3 storage".into(),
                })?;
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()?;
            Ok(Arc::new(store))
        }
    }
}
