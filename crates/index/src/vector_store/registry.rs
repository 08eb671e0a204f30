//! Process-wide vector store handle
//!
//! One registry is created at startup and shared by reference. The first
//! caller of `get_vector_store` runs the factory; concurrent first callers
//! wait on the same initialisation and every later call returns the same
//! `Arc`.

use super::{PgVectorStore, VectorStore};
use docchat_common::errors::{AppError, Result};
use futures::future::BoxFuture;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Async constructor for the shared store
pub type VectorStoreFactory =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn VectorStore>>> + Send + Sync>;

pub struct VectorStoreRegistry {
    store: OnceCell<Arc<dyn VectorStore>>,
    factory: VectorStoreFactory,
}

impl VectorStoreRegistry {
    pub fn new(factory: VectorStoreFactory) -> Self {
        Self {
            store: OnceCell::new(),
            factory,
        }
    }

    /// Registry producing a pgvector store over the application's pool
    pub fn postgres(pool: PgPool, table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(Box::new(move || {
            let pool = pool.clone();
            let table = table.clone();
            Box::pin(async move {
                let store = PgVectorStore::new(pool, table)?;
                store.ensure_setup().await?;
                Ok(Arc::new(store) as Arc<dyn VectorStore>)
            })
        }))
    }

    /// Registry around an already constructed store
    pub fn with_store(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store: OnceCell::new_with(Some(store.clone())),
            factory: Box::new(move || {
                let store = store.clone();
                Box::pin(async move { Ok(store) })
            }),
        }
    }

    pub async fn get_vector_store(&self) -> Result<Arc<dyn VectorStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let store = (self.factory)().await?;
                info!(store_id = %store.store_id(), "Vector store initialised");
                Ok::<_, AppError>(store)
            })
            .await?;
        Ok(store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryVectorStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_first_calls_initialise_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = Arc::new(VectorStoreRegistry::new(Box::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>)
            })
        })));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_vector_store().await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().store_id().to_string());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_failed_initialisation_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = VectorStoreRegistry::new(Box::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if attempt == 0 {
                    Err(AppError::DatabaseConnection {
                        message: "refused".into(),
                    })
                } else {
                    Ok(Arc::new(InMemoryVectorStore::new()) as Arc<dyn VectorStore>)
                }
            })
        }));

        assert!(registry.get_vector_store().await.is_err());
        assert!(registry.get_vector_store().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_store_returns_same_instance() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::with_id("fixed"));
        let registry = VectorStoreRegistry::with_store(store.clone());
        let first = registry.get_vector_store().await.unwrap();
        assert!(Arc::ptr_eq(&first, &store));
    }
}
