//! Embedding and indexing
//!
//! Architecture:
//! - EmbeddingService trait for the external embedding backend
//! - HashingEmbedder for deterministic offline embeddings, FastEmbedService behind the `fastembed` feature
//! - GuardedEmbedder bounding every call with a timeout and zero-vector fallback
//! - HNSW (L2) for vector similarity search with tombstoned deletes
//! - BM25 Okapi lexical index with copy-on-write statistics
mod batch;
mod keyword_index;
mod provider;
mod tokenizer;
mod vector_index;

pub use batch::{BatchItem, BatchResult, Embedded, GuardedEmbedder};
pub use keyword_index::{Bm25Corpus, Bm25Params, LexicalIndex};
#[cfg(feature = "fastembed")]
pub use provider::FastEmbedService;
pub use provider::{EmbeddingError, EmbeddingService, HashingEmbedder};
pub use tokenizer::Tokenizer;
pub use vector_index::{HnswParams, VectorHit, VectorIndex, VectorIndexError, VectorSnapshot};

use crate::config::IndexingConfig;

impl From<&IndexingConfig> for HnswParams {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search: config.hnsw_ef_search,
            max_elements: config.max_elements,
        }
    }
}
