//! Evidra - hybrid evidence retrieval for debate and fact-checking pipelines
//!
//! Combines BM25 and HNSW vector search, fuses the two signals with
//! query-adaptive weighting, and optionally reorders results with a
//! pretrained learning-to-rank model.

pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod retrieval;
pub mod telemetry;

pub use config::Config;
pub use embedding::{EmbeddingService, HashingEmbedder};
pub use error::{EvidraError, Result};
pub use memory::{MemoryEntry, Metadata, MetadataFilter};
pub use retrieval::{
    CancellationToken, ContextStyle, InsertOptions, RetrievalCandidate, RetrievalEngine,
    SearchError, SearchOptions, StoreStats,
};
