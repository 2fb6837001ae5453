//! Cooperative search cancellation

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline stage boundaries at which a search checks for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStage {
    Preprocess,
    Threshold,
    VectorCandidates,
    LexicalBlend,
    Rerank,
    Truncate,
}

impl fmt::Display for SearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchStage::Preprocess => "preprocess",
            SearchStage::Threshold => "threshold",
            SearchStage::VectorCandidates => "vector_candidates",
            SearchStage::LexicalBlend => "lexical_blend",
            SearchStage::Rerank => "rerank",
            SearchStage::Truncate => "truncate",
        };
        f.write_str(name)
    }
}

/// Cancellation flag shared between a caller and a running search.
/// Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
