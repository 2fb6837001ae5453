//! Ranked retrieval candidates

use crate::memory::Metadata;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A stored entry scored against one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,

    /// Raw vector similarity `1 / (1 + distance)`, if the entry was a vector candidate
    pub vector_score: Option<f64>,

    /// Batch-normalized BM25 score, if the entry was a lexical candidate
    pub lexical_score: Option<f64>,

    /// Raw Okapi BM25 score behind `lexical_score`; may be negative
    pub bm25_score: Option<f64>,

    /// Boosted fusion score
    pub fused_score: f64,

    /// Raw classifier probability, when the reranker ran
    pub rerank_score: Option<f64>,

    /// Score the result list is ordered by
    pub final_score: f64,

    /// 1-based position in the result list
    pub rank: u32,
}

impl RetrievalCandidate {
    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        if self.text.chars().count() <= max_chars {
            self.text.clone()
        } else {
            let head: String = self.text.chars().take(max_chars).collect();
            format!("{}...", head)
        }
    }
}

/// Descending by final score, ties by id
pub fn by_final_score(a: &RetrievalCandidate, b: &RetrievalCandidate) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort by final score and renumber ranks from 1
pub fn sort_and_rank(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(by_final_score);
    renumber(candidates);
}

/// Assign ranks 1..=n in current order
pub fn renumber(candidates: &mut [RetrievalCandidate]) {
    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = i as u32 + 1;
    }
}

#[cfg(test)]
pub(crate) fn candidate(id: &str, final_score: f64) -> RetrievalCandidate {
    RetrievalCandidate {
        id: id.to_string(),
        text: format!("text {}", id),
        metadata: Metadata::new(),
        vector_score: Some(final_score),
        lexical_score: None,
        bm25_score: None,
        fused_score: final_score,
        rerank_score: None,
        final_score,
        rank: 0,
    }
}
