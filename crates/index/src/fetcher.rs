//! Raw document content retrieval
//!
//! Documents are addressed by URL. HTTP(S) URLs are downloaded with reqwest;
//! anything else is treated as a path inside the asset bucket.

use async_trait::async_trait;
use docchat_common::errors::{AppError, Result};
use docchat_common::storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpContentFetcher {
    client: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|e| AppError::ContentFetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::ContentFetch {
                url: url.to_string(),
                message: format!("unexpected status {}", status),
            });
        }

        let bytes = response.bytes().await.map_err(|e| AppError::ContentFetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        debug!(bytes = bytes.len(), "Fetched document content");
        Ok(bytes.to_vec())
    }
}

/// Reads bucket-relative URLs (`file://path`, `local://path` or a bare path)
pub struct ObjectStoreFetcher {
    fs: Arc<dyn ObjectStore>,
}

impl ObjectStoreFetcher {
    pub fn new(fs: Arc<dyn ObjectStore>) -> Self {
        Self { fs }
    }

    /// Object path addressed by a URL
    pub fn object_path(url: &str) -> &str {
        url.strip_prefix("file://")
            .or_else(|| url.strip_prefix("local://"))
            .unwrap_or(url)
            .trim_start_matches('/')
    }
}

#[async_trait]
impl ContentFetcher for ObjectStoreFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fs
            .read(Self::object_path(url))
            .await
            .map_err(|e| AppError::ContentFetch {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

/// Dispatches on URL scheme: HTTP(S) goes to `http`, the rest to `objects`
pub struct SchemeContentFetcher {
    http: Arc<dyn ContentFetcher>,
    objects: Arc<dyn ContentFetcher>,
}

impl SchemeContentFetcher {
    pub fn new(http: Arc<dyn ContentFetcher>, objects: Arc<dyn ContentFetcher>) -> Self {
        Self { http, objects }
    }
}

#[async_trait]
impl ContentFetcher for SchemeContentFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.fetch(url).await
        } else {
            self.objects.fetch(url).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_common::storage::MemoryObjectStore;

    #[test]
    fn test_object_path() {
        assert_eq!(ObjectStoreFetcher::object_path("file:///docs/a.pdf"), "docs/a.pdf");
        assert_eq!(ObjectStoreFetcher::object_path("local://docs/a.pdf"), "docs/a.pdf");
        assert_eq!(ObjectStoreFetcher::object_path("docs/a.pdf"), "docs/a.pdf");
    }

    #[tokio::test]
    async fn test_object_fetch_and_missing() {
        let fs = Arc::new(MemoryObjectStore::new());
        fs.write("docs/a.txt", b"hello").await.unwrap();
        let fetcher = ObjectStoreFetcher::new(fs);

        assert_eq!(fetcher.fetch("file://docs/a.txt").await.unwrap(), b"hello");
        assert!(matches!(
            fetcher.fetch("docs/missing.txt").await,
            Err(AppError::ContentFetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_scheme_dispatch_uses_objects_for_paths() {
        let fs = Arc::new(MemoryObjectStore::new());
        fs.write("a.txt", b"local").await.unwrap();
        let objects: Arc<dyn ContentFetcher> = Arc::new(ObjectStoreFetcher::new(fs));
        let http: Arc<dyn ContentFetcher> =
            Arc::new(HttpContentFetcher::new(Duration::from_secs(1)).unwrap());
        let fetcher = SchemeContentFetcher::new(http, objects);
        assert_eq!(fetcher.fetch("a.txt").await.unwrap(), b"local");
    }
}
