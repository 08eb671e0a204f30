//! Document index builder / loader
//!
//! For each selected document: load its persisted index from the shared
//! storage context, or build one (fetch, parse, chunk, embed, write vectors,
//! persist the record). Documents are handled concurrently and a failure in
//! one never affects its siblings.

use crate::cache::StorageContextCache;
use crate::fetcher::ContentFetcher;
use crate::pdf::extract_pages;
use crate::processor::{processor_for, DocumentProcessor};
use crate::profiles::{CategoryProfile, CategoryProfiles};
use crate::storage_context::{IndexStruct, StorageContext};
use crate::vector_store::{EmbeddedNode, VectorStore, VectorStoreRegistry};
use docchat_common::config::EmbeddingConfig;
use docchat_common::documents::{Document, DocumentCategory};
use docchat_common::embeddings::{create_embedder, Embedder};
use docchat_common::errors::{AppError, Result};
use docchat_common::metrics;
use docchat_common::storage::ObjectStore;
use docchat_common::timeout::embedding_deadline;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A ready-to-query index over one document's nodes
#[derive(Clone)]
pub struct DocumentIndex {
    pub index_struct: IndexStruct,
    pub vector_store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub category: DocumentCategory,
}

impl DocumentIndex {
    pub fn doc_id(&self) -> Uuid {
        self.index_struct.doc_id
    }

    pub fn index_id(&self) -> Uuid {
        self.index_struct.index_id
    }
}

impl std::fmt::Debug for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentIndex")
            .field("index_struct", &self.index_struct)
            .field("vector_store", &self.vector_store.store_id())
            .field("embedder", &self.embedder.model_name())
            .field("category", &self.category)
            .finish()
    }
}

#[derive(Debug)]
pub struct IndexFailure {
    pub document_id: Uuid,
    pub error: AppError,
}

/// Result of indexing a document set
#[derive(Debug, Default)]
pub struct IndexMap {
    pub indices: HashMap<Uuid, DocumentIndex>,
    pub failures: Vec<IndexFailure>,
}

impl IndexMap {
    pub fn get(&self, doc_id: &Uuid) -> Option<&DocumentIndex> {
        self.indices.get(doc_id)
    }

    pub fn failed_ids(&self) -> Vec<Uuid> {
        self.failures.iter().map(|f| f.document_id).collect()
    }
}

/// Embedding clients by model name
#[derive(Clone, Default)]
pub struct EmbedderSet {
    embedders: HashMap<String, Arc<dyn Embedder>>,
}

impl EmbedderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One client per model referenced by the profile table
    pub fn from_config(config: &EmbeddingConfig, profiles: &CategoryProfiles) -> Result<Self> {
        let mut set = Self::new();
        for model in profiles.embedding_models() {
            let embedder = create_embedder(config, &model)?;
            set = set.with(model, embedder);
        }
        Ok(set)
    }

    /// The same client for every model in the profile table
    pub fn uniform(embedder: Arc<dyn Embedder>, profiles: &CategoryProfiles) -> Self {
        profiles
            .embedding_models()
            .into_iter()
            .fold(Self::new(), |set, model| set.with(model, embedder.clone()))
    }

    pub fn with(mut self, model: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        self.embedders.insert(model.into(), embedder);
        self
    }

    pub fn get(&self, model: &str) -> Result<Arc<dyn Embedder>> {
        self.embedders.get(model).cloned().ok_or_else(|| AppError::Configuration {
            message: format!("no embedder configured for model {}", model),
        })
    }
}

pub struct IndexBuilder {
    registry: Arc<VectorStoreRegistry>,
    cache: Arc<StorageContextCache>,
    fetcher: Arc<dyn ContentFetcher>,
    embedders: EmbedderSet,
    profiles: CategoryProfiles,
    processors: HashMap<DocumentCategory, Arc<dyn DocumentProcessor>>,
    persist_dir: String,
    embedding_timeout: Duration,
    batch_size: usize,
    /// One build at a time per document
    build_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl IndexBuilder {
    pub fn new(
        registry: Arc<VectorStoreRegistry>,
        cache: Arc<StorageContextCache>,
        fetcher: Arc<dyn ContentFetcher>,
        embedders: EmbedderSet,
        profiles: CategoryProfiles,
        persist_dir: impl Into<String>,
    ) -> Result<Self> {
        let mut processors = HashMap::new();
        for category in DocumentCategory::ALL {
            processors.insert(category, processor_for(profiles.get(category))?);
        }

        Ok(Self {
            registry,
            cache,
            fetcher,
            embedders,
            profiles,
            processors,
            persist_dir: persist_dir.into(),
            embedding_timeout: Duration::from_secs(30),
            batch_size: 100,
            build_locks: DashMap::new(),
        })
    }

    pub fn with_embedding_limits(mut self, timeout: Duration, batch_size: usize) -> Self {
        self.embedding_timeout = timeout;
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn profiles(&self) -> &CategoryProfiles {
        &self.profiles
    }

    pub fn registry(&self) -> &Arc<VectorStoreRegistry> {
        &self.registry
    }

    /// Load or build an index for every document.
    ///
    /// Per-document errors land in `IndexMap::failures`. Only failing to
    /// open or create the storage context fails the whole call.
    #[instrument(skip(self, documents, fs), fields(documents = documents.len()))]
    pub async fn build_index_map(
        &self,
        documents: &[Document],
        fs: Arc<dyn ObjectStore>,
    ) -> Result<IndexMap> {
        let vector_store = self.registry.get_vector_store().await?;
        let context = self.storage_context(vector_store, fs).await?;

        let results = join_all(
            documents
                .iter()
                .map(|document| self.load_or_build(document, &context)),
        )
        .await;

        let mut index_map = IndexMap::default();
        for (document, result) in documents.iter().zip(results) {
            match result {
                Ok(index) => {
                    index_map.indices.insert(document.id, index);
                }
                Err(error) => {
                    warn!(document_id = %document.id, error = %error, "Document index unavailable");
                    index_map.failures.push(IndexFailure {
                        document_id: document.id,
                        error,
                    });
                }
            }
        }

        info!(
            indexed = index_map.indices.len(),
            failed = index_map.failures.len(),
            "Index map ready"
        );
        Ok(index_map)
    }

    async fn storage_context(
        &self,
        vector_store: Arc<dyn VectorStore>,
        fs: Arc<dyn ObjectStore>,
    ) -> Result<Arc<StorageContext>> {
        self.cache
            .get_or_create_storage_context(&self.persist_dir, vector_store, fs)
            .await
    }

    async fn load_or_build(
        &self,
        document: &Document,
        context: &StorageContext,
    ) -> Result<DocumentIndex> {
        let category = document.category();
        let profile = self.profiles.get(category);
        let embedder = self.embedders.get(&profile.embedding_model)?;

        let index_struct = match context.load_index(document.id, &profile.embedding_model).await {
            Ok(index_struct) => {
                debug!(document_id = %document.id, "Loaded persisted index");
                metrics::record_index("loaded", category.as_str());
                index_struct
            }
            Err(AppError::IndexNotFound { .. } | AppError::CorruptIndex { .. }) => {
                self.build_exclusive(document, profile, embedder.clone(), context)
                    .await
                    .inspect_err(|_| metrics::record_index("failed", category.as_str()))?
            }
            Err(e) => return Err(e),
        };

        Ok(DocumentIndex {
            index_struct,
            vector_store: context.vector_store(),
            embedder,
            category,
        })
    }

    /// Build under the document's lock. A caller that waited on another
    /// build reuses its record instead of embedding again.
    async fn build_exclusive(
        &self,
        document: &Document,
        profile: &CategoryProfile,
        embedder: Arc<dyn Embedder>,
        context: &StorageContext,
    ) -> Result<IndexStruct> {
        let lock = self.build_locks.entry(document.id).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            match context.load_index(document.id, &profile.embedding_model).await {
                Ok(index_struct) => {
                    debug!(document_id = %document.id, "Index built by a concurrent caller");
                    metrics::record_index("loaded", profile.category.as_str());
                    Ok(index_struct)
                }
                Err(e @ (AppError::IndexNotFound { .. } | AppError::CorruptIndex { .. })) => {
                    if matches!(e, AppError::CorruptIndex { .. }) {
                        warn!(document_id = %document.id, reason = %e, "Rebuilding unusable index");
                    }
                    self.build_document_index(document, profile, embedder, context).await
                }
                Err(e) => Err(e),
            }
        };
        drop(lock);
        self.build_locks
            .remove_if(&document.id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    #[instrument(skip_all, fields(document_id = %document.id, category = %profile.category))]
    async fn build_document_index(
        &self,
        document: &Document,
        profile: &CategoryProfile,
        embedder: Arc<dyn Embedder>,
        context: &StorageContext,
    ) -> Result<IndexStruct> {
        let started = Instant::now();
        let bytes = self.fetcher.fetch(&document.url).await?;

        let processor = self
            .processors
            .get(&profile.category)
            .cloned()
            .ok_or_else(|| AppError::Internal {
                message: format!("no processor for category {}", profile.category),
            })?;
        let owned = document.clone();
        let nodes = tokio::task::spawn_blocking(move || {
            let pages = extract_pages(owned.id, &bytes)?;
            processor.process(&owned, &pages)
        })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("document processing task failed: {}", e),
        })??;

        if nodes.is_empty() {
            return Err(AppError::DocumentParse {
                doc_id: document.id.to_string(),
                message: "document produced no chunks".to_string(),
            });
        }

        let vector_store = context.vector_store();
        let orphans = vector_store.delete_document(document.id).await?;
        if orphans > 0 {
            warn!(orphans, "Removed vectors left by an interrupted build");
        }

        let mut node_ids = Vec::with_capacity(nodes.len());
        for batch in nodes.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            let embeddings =
                embedding_deadline(self.embedding_timeout, embedder.embed_batch(&texts)).await?;
            if embeddings.len() != batch.len() {
                return Err(AppError::EmbeddingError {
                    message: format!(
                        "expected {} embeddings, received {}",
                        batch.len(),
                        embeddings.len()
                    ),
                });
            }

            let embedded: Vec<EmbeddedNode> = batch
                .iter()
                .cloned()
                .zip(embeddings)
                .map(|(node, embedding)| EmbeddedNode { node, embedding })
                .collect();
            vector_store.add(&embedded).await?;
            node_ids.extend(batch.iter().map(|n| n.id));
        }

        let index_struct = IndexStruct::new(
            document.id,
            profile.embedding_model.clone(),
            embedder.dimension(),
            node_ids,
        );
        context.persist_index(&index_struct).await?;

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_index_build(elapsed, index_struct.node_ids.len(), profile.category.as_str());
        metrics::record_index("built", profile.category.as_str());
        info!(
            nodes = index_struct.node_ids.len(),
            model = %profile.embedding_model,
            elapsed_secs = elapsed,
            "Built document index"
        );

        Ok(index_struct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryVectorStore;
    use async_trait::async_trait;
    use docchat_common::embeddings::MockEmbedder;
    use docchat_common::storage::MemoryObjectStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Embedder that counts calls
    pub struct CountingEmbedder {
        inner: MockEmbedder,
        pub calls: AtomicUsize,
    }

    impl CountingEmbedder {
        pub fn new() -> Self {
            Self {
                inner: MockEmbedder::new(64),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.embed_batch(texts).await
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    /// Serves canned bodies by URL, failing for unknown URLs
    #[derive(Default)]
    pub struct MapFetcher {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MapFetcher {
        pub fn with(self, url: &str, body: &str) -> Self {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), body.as_bytes().to_vec());
            self
        }
    }

    #[async_trait]
    impl ContentFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.bodies.lock().unwrap().get(url).cloned().ok_or_else(|| {
                AppError::ContentFetch {
                    url: url.to_string(),
                    message: "404".to_string(),
                }
            })
        }
    }

    pub fn guideline(url: &str, title: &str) -> Document {
        Document::new(
            url,
            json!({"clinical_guideline": {"title": title, "issuing_organization": "WHO"}})
                .as_object()
                .cloned()
                .unwrap(),
        )
    }

    pub fn builder_with(
        fetcher: MapFetcher,
        embedder: Arc<dyn Embedder>,
        store: Arc<InMemoryVectorStore>,
    ) -> IndexBuilder {
        let profiles = CategoryProfiles::default();
        IndexBuilder::new(
            Arc::new(VectorStoreRegistry::with_store(store)),
            Arc::new(StorageContextCache::default()),
            Arc::new(fetcher),
            EmbedderSet::uniform(embedder, &profiles),
            profiles,
            "index",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_second_build_is_idempotent() {
        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(InMemoryVectorStore::new());
        let fetcher = MapFetcher::default().with(
            "a.txt",
            "Adults with hypertension should be treated. Grade A. Lifestyle changes are advised.",
        );
        let builder = builder_with(fetcher, embedder.clone(), store.clone());
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let documents = vec![guideline("a.txt", "Hypertension")];

        let first = builder.build_index_map(&documents, fs.clone()).await.unwrap();
        let calls_after_first = embedder.calls.load(Ordering::SeqCst);
        assert!(calls_after_first > 0);
        let stored = store.len();

        let second = builder.build_index_map(&documents, fs).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(store.len(), stored);

        let id = documents[0].id;
        assert_eq!(first.get(&id).unwrap().index_id(), second.get(&id).unwrap().index_id());
        assert_eq!(
            first.get(&id).unwrap().index_struct.node_ids,
            second.get(&id).unwrap().index_struct.node_ids
        );
    }

    #[tokio::test]
    async fn test_failure_is_contained_to_its_document() {
        let fetcher = MapFetcher::default()
            .with("1.txt", "The first guideline recommends daily exercise for adults.")
            .with("3.txt", "The third guideline recommends annual screening for adults.");
        let store = Arc::new(InMemoryVectorStore::new());
        let builder = builder_with(fetcher, Arc::new(CountingEmbedder::new()), store);
        let documents = vec![
            guideline("1.txt", "One"),
            guideline("2.txt", "Two"),
            guideline("3.txt", "Three"),
        ];

        let map = builder
            .build_index_map(&documents, Arc::new(MemoryObjectStore::new()))
            .await
            .unwrap();

        assert_eq!(map.indices.len(), 2);
        assert!(map.get(&documents[0].id).is_some());
        assert!(map.get(&documents[2].id).is_some());
        assert_eq!(map.failed_ids(), vec![documents[1].id]);
        assert!(matches!(map.failures[0].error, AppError::ContentFetch { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_record_triggers_rebuild() {
        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(InMemoryVectorStore::new());
        let fetcher = MapFetcher::default()
            .with("a.txt", "Statins are recommended for adults at elevated cardiovascular risk.");
        let builder = builder_with(fetcher, embedder.clone(), store.clone());
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let documents = vec![guideline("a.txt", "Lipids")];

        let first = builder.build_index_map(&documents, fs.clone()).await.unwrap();
        let calls = embedder.calls.load(Ordering::SeqCst);

        // Vectors lost behind the record's back
        store.delete_document(documents[0].id).await.unwrap();

        let second = builder.build_index_map(&documents, fs).await.unwrap();
        assert!(embedder.calls.load(Ordering::SeqCst) > calls);
        let id = documents[0].id;
        assert_ne!(first.get(&id).unwrap().index_id(), second.get(&id).unwrap().index_id());
        assert_eq!(
            store.count_document_nodes(id).await.unwrap() as usize,
            second.get(&id).unwrap().index_struct.node_ids.len()
        );
    }

    #[tokio::test]
    async fn test_model_change_triggers_rebuild() {
        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(InMemoryVectorStore::new());
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let documents = vec![guideline("a.txt", "Asthma")];
        let body = "Inhaled corticosteroids are recommended for persistent asthma.";

        let builder = builder_with(MapFetcher::default().with("a.txt", body), embedder.clone(), store.clone());
        builder.build_index_map(&documents, fs.clone()).await.unwrap();
        let calls = embedder.calls.load(Ordering::SeqCst);

        let profiles = CategoryProfiles::with_models("text-embedding-ada-002", "clinical-v2");
        let rebuilt = IndexBuilder::new(
            Arc::new(VectorStoreRegistry::with_store(store)),
            Arc::new(StorageContextCache::default()),
            Arc::new(MapFetcher::default().with("a.txt", body)),
            EmbedderSet::uniform(embedder.clone(), &profiles),
            profiles,
            "index",
        )
        .unwrap();
        let map = rebuilt.build_index_map(&documents, fs).await.unwrap();

        assert!(embedder.calls.load(Ordering::SeqCst) > calls);
        assert_eq!(
            map.get(&documents[0].id).unwrap().index_struct.embedding_model,
            "clinical-v2"
        );
    }

    #[tokio::test]
    async fn test_missing_embedder_is_a_document_failure() {
        let store = Arc::new(InMemoryVectorStore::new());
        let profiles = CategoryProfiles::default();
        let builder = IndexBuilder::new(
            Arc::new(VectorStoreRegistry::with_store(store)),
            Arc::new(StorageContextCache::default()),
            Arc::new(MapFetcher::default()),
            EmbedderSet::new(),
            profiles,
            "index",
        )
        .unwrap();

        let map = builder
            .build_index_map(&[guideline("a.txt", "X")], Arc::new(MemoryObjectStore::new()))
            .await
            .unwrap();
        assert!(map.indices.is_empty());
        assert!(matches!(map.failures[0].error, AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_builds_of_one_document_share_a_record() {
        let body = "Adults with hypertension should be treated. Grade A. Lifestyle changes are advised. \
                    Blood pressure should be measured at every visit. Grade B.";
        let documents = vec![guideline("a.txt", "Hypertension")];

        // Reference: one uncontended build
        let solo_embedder = Arc::new(CountingEmbedder::new());
        let solo_store = Arc::new(InMemoryVectorStore::new());
        builder_with(MapFetcher::default().with("a.txt", body), solo_embedder.clone(), solo_store.clone())
            .with_embedding_limits(Duration::from_secs(5), 1)
            .build_index_map(&documents, Arc::new(MemoryObjectStore::new()))
            .await
            .unwrap();

        let embedder = Arc::new(CountingEmbedder::new());
        let store = Arc::new(InMemoryVectorStore::new());
        let builder = builder_with(MapFetcher::default().with("a.txt", body), embedder.clone(), store.clone())
            .with_embedding_limits(Duration::from_secs(5), 1);
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());

        let (a, b) = tokio::join!(
            builder.build_index_map(&documents, fs.clone()),
            builder.build_index_map(&documents, fs.clone())
        );
        let id = documents[0].id;
        let (a, b) = (a.unwrap(), b.unwrap());
        let record_a = &a.get(&id).unwrap().index_struct;
        let record_b = &b.get(&id).unwrap().index_struct;

        assert_eq!(record_a.index_id, record_b.index_id);
        assert_eq!(record_a.node_ids, record_b.node_ids);
        assert_eq!(store.len(), record_a.node_ids.len());
        assert_eq!(store.len(), solo_store.len());
        assert_eq!(
            embedder.calls.load(Ordering::SeqCst),
            solo_embedder.calls.load(Ordering::SeqCst)
        );

        // A later call loads rather than treating the record as corrupt
        builder.build_index_map(&documents, fs).await.unwrap();
        assert_eq!(
            embedder.calls.load(Ordering::SeqCst),
            solo_embedder.calls.load(Ordering::SeqCst)
        );
        assert!(builder.build_locks.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_builds_of_distinct_documents() {
        let fetcher = MapFetcher::default()
            .with("1.txt", "The first guideline recommends daily exercise for adults.")
            .with("2.txt", "The second guideline recommends annual screening for adults.");
        let store = Arc::new(InMemoryVectorStore::new());
        let builder = Arc::new(builder_with(fetcher, Arc::new(CountingEmbedder::new()), store.clone()));
        let fs: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let one = vec![guideline("1.txt", "One")];
        let two = vec![guideline("2.txt", "Two")];

        let (first, second) = tokio::join!(
            builder.build_index_map(&one, fs.clone()),
            builder.build_index_map(&two, fs.clone())
        );
        let first = first.unwrap();
        let second = second.unwrap();
        let nodes = first.get(&one[0].id).unwrap().index_struct.node_ids.len()
            + second.get(&two[0].id).unwrap().index_struct.node_ids.len();
        assert_eq!(store.len(), nodes);

        // Both records live in the one shared storage context
        let reloaded = builder.build_index_map(&[one[0].clone(), two[0].clone()], fs).await.unwrap();
        assert_eq!(reloaded.indices.len(), 2);
        assert_eq!(store.len(), nodes);
    }
}
