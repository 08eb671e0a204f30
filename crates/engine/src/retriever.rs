//! Per-document vector retrieval

use docchat_common::documents::DB_DOC_ID_KEY;
use docchat_common::errors::Result;
use docchat_common::timeout::embedding_deadline;
use docchat_index::{DocumentIndex, MetadataFilters, NodeWithScore, VectorStoreQuery};
use std::time::Duration;
use tracing::{debug, instrument};

/// Retrieves the top-k nodes of a single document.
///
/// The document-id filter is part of the store query, so nodes of other
/// documents can never be returned regardless of similarity.
pub struct VectorIndexRetriever {
    index: DocumentIndex,
    similarity_top_k: usize,
    filters: MetadataFilters,
    embedding_timeout: Duration,
}

impl VectorIndexRetriever {
    pub fn new(index: DocumentIndex, similarity_top_k: usize, embedding_timeout: Duration) -> Self {
        let filters = MetadataFilters::exact(DB_DOC_ID_KEY, index.doc_id().to_string());
        Self {
            index,
            similarity_top_k,
            filters,
            embedding_timeout,
        }
    }

    pub fn similarity_top_k(&self) -> usize {
        self.similarity_top_k
    }

    pub fn filters(&self) -> &MetadataFilters {
        &self.filters
    }

    #[instrument(skip(self), fields(doc_id = %self.index.doc_id(), top_k = self.similarity_top_k))]
    pub async fn retrieve(&self, query: &str) -> Result<Vec<NodeWithScore>> {
        let embedding =
            embedding_deadline(self.embedding_timeout, self.index.embedder.embed(query)).await?;

        let nodes = self
            .index
            .vector_store
            .query(&VectorStoreQuery {
                embedding,
                similarity_top_k: self.similarity_top_k,
                filters: self.filters.clone(),
            })
            .await?;

        debug!(retrieved = nodes.len(), "Retrieved nodes");
        Ok(nodes)
    }
}
