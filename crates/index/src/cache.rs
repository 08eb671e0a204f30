//! Storage context cache
//!
//! Keeps recently opened storage contexts keyed by persist directory and
//! vector store identity, so that repeated conversation setups do not re-read
//! the manifest. Entries expire after a TTL and the cache is bounded with LRU
//! eviction. A miss is resolved while holding the lock, so concurrent callers
//! for the same key share one context.

use crate::storage_context::StorageContext;
use crate::vector_store::VectorStore;
use docchat_common::config::CacheConfig;
use docchat_common::errors::{AppError, Result};
use docchat_common::metrics;
use docchat_common::storage::ObjectStore;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

type CacheKey = (String, String);

#[derive(Clone)]
struct CacheEntry {
    context: Arc<StorageContext>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(context: Arc<StorageContext>, ttl: Duration) -> Self {
        Self {
            context,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct StorageContextCache {
    ttl: Duration,
    store: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl StorageContextCache {
    const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(10) {
        Some(n) => n,
        None => unreachable!(),
    };

    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(Self::DEFAULT_CAPACITY);
        Self {
            ttl,
            store: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.storage_context_ttl_secs), config.max_entries)
    }

    /// Cached context for `(persist_dir, vector_store)`, opening it on a miss.
    ///
    /// Returns `ObjectNotFound` when nothing has been persisted there yet.
    pub async fn get_storage_context(
        &self,
        persist_dir: &str,
        vector_store: Arc<dyn VectorStore>,
        fs: Arc<dyn ObjectStore>,
    ) -> Result<Arc<StorageContext>> {
        self.resolve(persist_dir, vector_store, fs, false).await
    }

    /// Like `get_storage_context`, but creates and persists a fresh context
    /// when the directory has no manifest.
    pub async fn get_or_create_storage_context(
        &self,
        persist_dir: &str,
        vector_store: Arc<dyn VectorStore>,
        fs: Arc<dyn ObjectStore>,
    ) -> Result<Arc<StorageContext>> {
        self.resolve(persist_dir, vector_store, fs, true).await
    }

    /// Store a context, replacing any entry under the same key
    pub async fn insert(&self, context: StorageContext) -> Arc<StorageContext> {
        let key = (context.persist_dir().to_string(), context.store_id().to_string());
        let context = Arc::new(context);
        self.store
            .lock()
            .await
            .push(key, CacheEntry::new(context.clone(), self.ttl));
        context
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn resolve(
        &self,
        persist_dir: &str,
        vector_store: Arc<dyn VectorStore>,
        fs: Arc<dyn ObjectStore>,
        create_missing: bool,
    ) -> Result<Arc<StorageContext>> {
        let key = (persist_dir.to_string(), vector_store.store_id().to_string());
        let mut store = self.store.lock().await;

        if let Some(entry) = store.get(&key) {
            if !entry.is_expired() {
                metrics::record_cache(true, "storage_context");
                return Ok(entry.context.clone());
            }
            debug!(persist_dir, "Storage context expired");
            store.pop(&key);
        }
        metrics::record_cache(false, "storage_context");

        let context = match StorageContext::open(persist_dir, vector_store.clone(), fs.clone()).await {
            Ok(context) => context,
            Err(AppError::ObjectNotFound { .. }) if create_missing => {
                StorageContext::create(persist_dir, vector_store, fs).await?
            }
            Err(e) => return Err(e),
        };

        let context = Arc::new(context);
        store.push(key, CacheEntry::new(context.clone(), self.ttl));
        Ok(context)
    }
}

impl Default for StorageContextCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryVectorStore;
    use docchat_common::storage::MemoryObjectStore;
    use futures::future::join_all;

    async fn seeded() -> (Arc<dyn VectorStore>, Arc<dyn ObjectStore>) {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        StorageContext::create("index", store.clone(), fs.clone()).await.unwrap();
        (store, fs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl_and_refresh_after() {
        let cache = StorageContextCache::new(Duration::from_secs(300), 10);
        let (store, fs) = seeded().await;

        let first = cache.get_storage_context("index", store.clone(), fs.clone()).await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache.get_storage_context("index", store.clone(), fs.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        tokio::time::advance(Duration::from_secs(2)).await;
        let third = cache.get_storage_context("index", store, fs).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_not_cached() {
        let cache = StorageContextCache::default();
        let result = cache
            .get_storage_context(
                "nowhere",
                Arc::new(InMemoryVectorStore::new()),
                Arc::new(MemoryObjectStore::new()),
            )
            .await;
        assert!(matches!(result, Err(AppError::ObjectNotFound { .. })));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_create_persists_manifest() {
        let cache = StorageContextCache::default();
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let created = cache
            .get_or_create_storage_context("fresh", store.clone(), fs.clone())
            .await
            .unwrap();
        let reopened = StorageContext::open("fresh", store, fs).await.unwrap();
        assert_eq!(reopened.manifest(), created.manifest());
    }

    #[tokio::test]
    async fn test_key_includes_vector_store() {
        let cache = StorageContextCache::default();
        let (store_a, fs) = seeded().await;
        let store_b: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());

        let a = cache.get_storage_context("index", store_a, fs.clone()).await.unwrap();
        let b = cache.get_storage_context("index", store_b, fs).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_evicts_least_recently_used() {
        let cache = StorageContextCache::new(Duration::from_secs(300), 2);
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());

        let mut inserted = Vec::new();
        for dir in ["a", "b", "c"] {
            let context = StorageContext::create(dir, store.clone(), fs.clone()).await.unwrap();
            inserted.push(cache.insert(context).await);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(cache.len().await, 2);

        let c = cache.get_storage_context("c", store.clone(), fs.clone()).await.unwrap();
        assert!(Arc::ptr_eq(&c, &inserted[2]));

        let a = cache.get_storage_context("a", store, fs).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &inserted[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_context() {
        let cache = Arc::new(StorageContextCache::default());
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let handles = (0..16).map(|_| {
            let (cache, store, fs) = (cache.clone(), store.clone(), fs.clone());
            tokio::spawn(async move {
                cache.get_or_create_storage_context("index", store, fs).await
            })
        });
        let contexts: Vec<Arc<StorageContext>> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(contexts.iter().all(|c| Arc::ptr_eq(c, &contexts[0])));
        assert_eq!(cache.len().await, 1);
    }
}
