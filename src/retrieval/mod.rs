//! Hybrid retrieval and reranking
//!
//! Search pipeline, one stage per module:
//! - vector and lexical candidate pools, oversampled and metadata-filtered
//! - batch normalization and query-adaptive fusion (linear or RRF)
//! - metadata boost and adaptive threshold
//! - optional learning-to-rank reranker over a fixed feature schema

mod boost;
mod cancel;
mod candidate;
mod context;
mod features;
mod fusion;
mod hybrid;
mod normalize;
mod reranker;
mod threshold;

pub use boost::MetadataBooster;
pub use cancel::{CancellationToken, SearchStage};
pub use candidate::{by_final_score, renumber, sort_and_rank, RetrievalCandidate};
pub use context::{format_context, ContextStyle};
pub use features::{FeatureExtractor, FEATURE_COUNT, FEATURE_NAMES};
pub use fusion::{
    adaptive_alpha, reciprocal_rank_fusion, FusionConfig, FusionError, FusionOutcome,
    HybridFusion, QueryClassifier, QueryMode,
};
pub use hybrid::{
    IndexError, InsertOptions, RetrievalEngine, SearchError, SearchOptions, StoreStats,
};
pub use normalize::{min_max_normalize, normalize_scores};
pub use reranker::{
    LogisticClassifier, ProbabilisticClassifier, RerankError, RerankModel, RerankOutcome,
    Reranker, SigmoidCalibration, StandardScaler,
};
pub use threshold::{AdaptiveThreshold, DEFAULT_BASE_THRESHOLD};
