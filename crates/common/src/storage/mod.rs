//! Object storage abstraction
//!
//! Filesystem-like access to buckets holding document assets and persisted
//! index state. Paths are `/`-separated and relative to the store root,
//! e.g. `docchat-index/storage.json`.

mod s3;

pub use s3::S3ObjectStore;

use crate::config::{StorageBackend, StorageConfig, StorageEnvironment};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read a whole object. Missing objects are `AppError::ObjectNotFound`.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a whole object, creating parent prefixes as needed
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Object paths under a prefix, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create a bucket / directory if missing
    async fn create_dir(&self, path: &str) -> Result<()>;
}

/// Open the store selected by `config.backend`
pub async fn open_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    info!(backend = ?config.backend, "Opening object store");
    Ok(match config.backend {
        StorageBackend::Filesystem => Arc::new(LocalObjectStore::open(config).await?),
        StorageBackend::S3 => Arc::new(S3ObjectStore::open(config).await?),
    })
}

/// Object store rooted at a local directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the store described by `config`, creating the buckets in local mode.
    ///
    /// In production mode the buckets must already exist.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let store = Self::new(&config.root);
        for bucket in [&config.asset_bucket, &config.index_bucket] {
            if store.exists(bucket).await? {
                continue;
            }
            match config.environment {
                StorageEnvironment::Local => {
                    info!(bucket = %bucket, "Creating missing bucket");
                    store.create_dir(bucket).await?;
                }
                StorageEnvironment::Production => {
                    return Err(AppError::Storage {
                        message: format!("bucket {} does not exist", bucket),
                    });
                }
            }
        }
        Ok(store)
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::InvalidFormat {
                message: format!("object path escapes the store root: {}", path),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)?).await?)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::ObjectNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so readers never observe a partial object
        let tmp = target.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = prefix.trim_end_matches('/');
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(format!("{}/{}", prefix, entry.file_name().to_string_lossy()));
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(path)?).await?;
        Ok(())
    }
}

/// Process-local object store
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> String {
        path.trim_matches('/').to_string()
    }
}

fn poisoned() -> AppError {
    AppError::Internal {
        message: "object store lock poisoned".to_string(),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let key = Self::key(path);
        let objects = self.objects.read().map_err(|_| poisoned())?;
        let dir_prefix = format!("{}/", key);
        Ok(objects.contains_key(&key) || objects.keys().any(|k| k.starts_with(&dir_prefix)))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(&Self::key(path))
            .cloned()
            .ok_or_else(|| AppError::ObjectNotFound {
                path: path.to_string(),
            })
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(Self::key(path), bytes.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir_prefix = format!("{}/", Self::key(prefix));
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(&dir_prefix) && !k[dir_prefix.len()..].contains('/'))
            .cloned()
            .collect())
    }

    async fn create_dir(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryObjectStore::new();
        assert!(!store.exists("bucket/a.json").await.unwrap());
        store.write("bucket/a.json", b"{}").await.unwrap();
        store.write("bucket/nested/b.json", b"{}").await.unwrap();

        assert!(store.exists("bucket").await.unwrap());
        assert_eq!(store.read("/bucket/a.json").await.unwrap(), b"{}");
        assert_eq!(store.list("bucket").await.unwrap(), vec!["bucket/a.json"]);
        assert!(matches!(
            store.read("bucket/missing.json").await,
            Err(AppError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let root = std::env::temp_dir().join(format!("docchat-store-{}", uuid::Uuid::new_v4()));
        let store = LocalObjectStore::new(&root);

        store.write("index/indices/a.json", b"[1]").await.unwrap();
        assert!(store.exists("index/indices/a.json").await.unwrap());
        assert_eq!(store.read("index/indices/a.json").await.unwrap(), b"[1]");
        assert_eq!(
            store.list("index/indices").await.unwrap(),
            vec!["index/indices/a.json"]
        );
        assert!(store.list("index/none").await.unwrap().is_empty());
        assert!(matches!(
            store.read("index/missing.json").await,
            Err(AppError::ObjectNotFound { .. })
        ));
        assert!(store.read("../escape").await.is_err());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_open_creates_local_buckets() {
        let root = std::env::temp_dir().join(format!("docchat-open-{}", uuid::Uuid::new_v4()));
        let config = StorageConfig {
            root: root.to_string_lossy().to_string(),
            ..StorageConfig::default()
        };
        let store = open_object_store(&config).await.unwrap();
        assert!(store.exists(&config.index_bucket).await.unwrap());
        assert!(store.exists(&config.asset_bucket).await.unwrap());

        let prod = StorageConfig {
            root: root.join("prod").to_string_lossy().to_string(),
            environment: StorageEnvironment::Production,
            ..StorageConfig::default()
        };
        assert!(LocalObjectStore::open(&prod).await.is_err());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
