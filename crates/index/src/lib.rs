//! DocChat index lifecycle
//!
//! Turns selected documents into queryable vector indices:
//! - Text extraction, category processors and chunking
//! - The shared vector store and its single-initialisation registry
//! - Persisted storage contexts and their TTL cache
//! - The concurrent per-document index builder / loader

pub mod builder;
pub mod cache;
pub mod chunker;
pub mod fetcher;
pub mod pdf;
pub mod processor;
pub mod profiles;
pub mod storage_context;
pub mod vector_store;

pub use builder::{DocumentIndex, EmbedderSet, IndexBuilder, IndexFailure, IndexMap};
pub use cache::StorageContextCache;
pub use fetcher::{ContentFetcher, HttpContentFetcher, ObjectStoreFetcher, SchemeContentFetcher};
pub use profiles::{CategoryProfile, CategoryProfiles, SynthesisKind, ToolGroup};
pub use storage_context::{IndexStruct, StorageContext};
pub use vector_store::{
    InMemoryVectorStore, MetadataFilters, Node, NodeWithScore, PgVectorStore, VectorStore,
    VectorStoreQuery, VectorStoreRegistry,
};
