//! Query-adaptive fusion of vector and lexical candidate pools

use super::boost::MetadataBooster;
use super::candidate::{sort_and_rank, RetrievalCandidate};
use super::normalize::normalize_scores;
use crate::memory::MemoryEntry;
use ahash::{HashMap, HashMapExt};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid query pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Queries matching these are answered from the vector pool alone
const SEMANTIC_PATTERNS: &[&str] = &[
    r"(?i)\bwhat is\b",
    r"(?i)\bexplain (the|how|why)\b",
    r"(?i)\bdescribe\s",
];

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Vector weight when `adaptive` is off
    pub default_alpha: f64,

    /// Pick alpha from query length
    pub adaptive: bool,

    /// Use reciprocal rank fusion instead of the linear blend
    pub rrf_enabled: bool,

    /// RRF K constant (typically 60)
    pub rrf_k: u32,

    /// Semantic-pattern queries drop candidates without a vector score
    pub vector_only_on_semantic: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            default_alpha: 0.7,
            adaptive: true,
            rrf_enabled: false,
            rrf_k: 60,
            vector_only_on_semantic: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Conceptual question, vector similarity only
    Semantic,
    /// Vector and lexical signals blended
    Hybrid,
}

/// Regex classifier for conceptual questions
#[derive(Debug, Clone)]
pub struct QueryClassifier {
    patterns: RegexSet,
}

impl QueryClassifier {
    pub fn new() -> Result<Self, FusionError> {
        Ok(Self {
            patterns: RegexSet::new(SEMANTIC_PATTERNS)?,
        })
    }

    pub fn is_semantic(&self, query: &str) -> bool {
        self.patterns.is_match(query)
    }
}

/// Vector weight by query length: short queries lean on embeddings,
/// long ones give keywords more say.
pub fn adaptive_alpha(query: &str) -> f64 {
    match query.split_whitespace().count() {
        n if n < 5 => 0.70,
        n if n > 15 => 0.50,
        _ => 0.60,
    }
}

/// Apply Reciprocal Rank Fusion to two ranked id lists
///
/// `score(id) = alpha / (k + r_v) + (1 - alpha) / (k + r_l)` over 1-based
/// ranks; an id missing from a list gets no term from it.
pub fn reciprocal_rank_fusion(
    vector_ranked: &[&str],
    lexical_ranked: &[&str],
    alpha: f64,
    rrf_k: u32,
) -> HashMap<String, f64> {
    let k = rrf_k as f64;
    let mut scores: HashMap<String, f64> = HashMap::new();

    for (rank, id) in vector_ranked.iter().enumerate() {
        *scores.entry(id.to_string()).or_insert(0.0) += alpha / (k + rank as f64 + 1.0);
    }

    for (rank, id) in lexical_ranked.iter().enumerate() {
        *scores.entry(id.to_string()).or_insert(0.0) += (1.0 - alpha) / (k + rank as f64 + 1.0);
    }

    scores
}

/// Fused, boosted and ranked candidates for one query
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub candidates: Vec<RetrievalCandidate>,
    pub mode: QueryMode,
    /// Effective vector weight
    pub alpha: f64,
    /// Whether any lexical score took part in fusion
    pub lexical_signal: bool,
}

#[derive(Default)]
struct Slot {
    entry: Option<Arc<MemoryEntry>>,
    vector: Option<f64>,
    lexical: Option<f64>,
    bm25: Option<f64>,
}

/// Combines the vector and lexical pools into one ranked list
#[derive(Debug, Clone)]
pub struct HybridFusion {
    config: FusionConfig,
    classifier: QueryClassifier,
}

impl HybridFusion {
    pub fn new(config: FusionConfig) -> Result<Self, FusionError> {
        Ok(Self {
            config,
            classifier: QueryClassifier::new()?,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn classify(&self, query: &str) -> QueryMode {
        if self.config.vector_only_on_semantic && self.classifier.is_semantic(query) {
            QueryMode::Semantic
        } else {
            QueryMode::Hybrid
        }
    }

    /// Vector weight used for `query` in hybrid mode
    pub fn alpha_for(&self, query: &str) -> f64 {
        if self.config.adaptive {
            adaptive_alpha(query)
        } else {
            self.config.default_alpha
        }
    }

    /// Fuse the pools
    ///
    /// `vector` carries raw similarities `1 / (1 + d)`, `lexical` raw BM25
    /// scores. Each pool is normalized as a batch, blended, multiplied by the
    /// metadata boost and clamped to [0, 1] when a lexical signal is present.
    /// RRF scores are scaled by `k + 1` so they share the [0, 1] range the
    /// similarity threshold is expressed in.
    pub fn fuse(
        &self,
        query: &str,
        vector: &[(Arc<MemoryEntry>, f64)],
        lexical: &[(Arc<MemoryEntry>, f64)],
    ) -> FusionOutcome {
        let mode = self.classify(query);
        let no_lexical: &[(Arc<MemoryEntry>, f64)] = &[];
        let lexical = match mode {
            QueryMode::Semantic => no_lexical,
            QueryMode::Hybrid => lexical,
        };
        let lexical_signal = !lexical.is_empty();
        let alpha = if lexical_signal { self.alpha_for(query) } else { 1.0 };

        let mut slots: BTreeMap<String, Slot> = BTreeMap::new();

        let vector_raw: Vec<f64> = vector.iter().map(|(_, s)| *s).collect();
        for ((entry, raw), norm) in vector.iter().zip(normalize_scores(&vector_raw)) {
            let slot = slots.entry(entry.id.clone()).or_default();
            slot.entry = Some(Arc::clone(entry));
            slot.vector = Some(if lexical_signal { norm } else { *raw });
        }

        let lexical_raw: Vec<f64> = lexical.iter().map(|(_, s)| *s).collect();
        for ((entry, raw), norm) in lexical.iter().zip(normalize_scores(&lexical_raw)) {
            let slot = slots.entry(entry.id.clone()).or_default();
            if slot.entry.is_none() {
                slot.entry = Some(Arc::clone(entry));
            }
            slot.lexical = Some(norm);
            slot.bm25 = Some(*raw);
        }

        let rrf = if self.config.rrf_enabled && lexical_signal {
            let vector_ranked = ranked_ids(vector);
            let lexical_ranked = ranked_ids(lexical);
            Some(reciprocal_rank_fusion(
                &vector_ranked,
                &lexical_ranked,
                alpha,
                self.config.rrf_k,
            ))
        } else {
            None
        };

        let raw_similarity: HashMap<&str, f64> =
            vector.iter().map(|(e, s)| (e.id.as_str(), *s)).collect();

        // best possible RRF score is 1 / (k + 1), at rank 1 in both lists
        let rrf_scale = self.config.rrf_k as f64 + 1.0;

        let mut candidates: Vec<RetrievalCandidate> = slots
            .into_iter()
            .filter_map(|(id, slot)| {
                let entry = slot.entry?;
                let blended = match &rrf {
                    Some(scores) => scores.get(&id).copied().unwrap_or(0.0) * rrf_scale,
                    None => {
                        alpha * slot.vector.unwrap_or(0.0)
                            + (1.0 - alpha) * slot.lexical.unwrap_or(0.0)
                    }
                };

                let mut fused = blended * MetadataBooster::boost(&entry.metadata);
                if lexical_signal {
                    fused = fused.clamp(0.0, 1.0);
                }

                Some(RetrievalCandidate {
                    vector_score: raw_similarity.get(id.as_str()).copied(),
                    lexical_score: slot.lexical,
                    bm25_score: slot.bm25,
                    id,
                    text: entry.text.clone(),
                    metadata: entry.metadata.clone(),
                    fused_score: fused,
                    rerank_score: None,
                    final_score: fused,
                    rank: 0,
                })
            })
            .collect();

        sort_and_rank(&mut candidates);

        tracing::debug!(
            "Fused {} candidates (mode={:?}, alpha={:.2}, rrf={})",
            candidates.len(),
            mode,
            alpha,
            rrf.is_some()
        );

        FusionOutcome {
            candidates,
            mode,
            alpha,
            lexical_signal,
        }
    }
}

/// Ids by score descending, ties by id
fn ranked_ids(pool: &[(Arc<MemoryEntry>, f64)]) -> Vec<&str> {
    let mut ranked: Vec<(&str, f64)> = pool.iter().map(|(e, s)| (e.id.as_str(), *s)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    ranked.into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Metadata;

    fn entry(id: &str) -> Arc<MemoryEntry> {
        Arc::new(MemoryEntry::new(id, format!("text {}", id), vec![0.0; 4], Metadata::new()))
    }

    fn fusion(config: FusionConfig) -> HybridFusion {
        HybridFusion::new(config).unwrap()
    }

    #[test]
    fn test_classifier() {
        let c = QueryClassifier::new().unwrap();
        assert!(c.is_semantic("What is nuclear fusion"));
        assert!(c.is_semantic("please explain how reactors work"));
        assert!(c.is_semantic("Describe the policy"));
        assert!(!c.is_semantic("nuclear waste storage costs"));
        assert!(!c.is_semantic("explainer video"));
    }

    #[test]
    fn test_adaptive_alpha_bands() {
        assert_eq!(adaptive_alpha("nuclear waste"), 0.70);
        assert_eq!(adaptive_alpha("one two three four five"), 0.60);
        let long = "word ".repeat(16);
        assert_eq!(adaptive_alpha(&long), 0.50);
    }

    #[test]
    fn test_rrf_basic() {
        let fused = reciprocal_rank_fusion(&["a", "b", "c"], &["b", "a", "d"], 0.5, 60);

        assert_eq!(fused.len(), 4);
        // present in both lists
        assert!(fused["a"] > fused["c"]);
        assert!(fused["b"] > fused["d"]);
        assert!((fused["a"] - (0.5 / 61.0 + 0.5 / 62.0)).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_weighted() {
        let fused = reciprocal_rank_fusion(&["a"], &["b"], 0.7, 60);
        assert!(fused["a"] > fused["b"]);
    }

    #[test]
    fn test_linear_blend_in_unit_range() {
        let f = fusion(FusionConfig::default());
        let vector = vec![(entry("a"), 0.9), (entry("b"), 0.4)];
        let lexical = vec![(entry("b"), 7.5), (entry("c"), -1.2)];

        let outcome = f.fuse("nuclear waste", &vector, &lexical);
        assert_eq!(outcome.mode, QueryMode::Hybrid);
        assert!(outcome.lexical_signal);
        assert_eq!(outcome.alpha, 0.70);
        assert_eq!(outcome.candidates.len(), 3);

        for (i, c) in outcome.candidates.iter().enumerate() {
            assert!((0.0..=1.0).contains(&c.fused_score));
            assert_eq!(c.rank, i as u32 + 1);
        }

        let b = outcome.candidates.iter().find(|c| c.id == "b").unwrap();
        assert_eq!(b.vector_score, Some(0.4));
        assert_eq!(b.lexical_score, Some(1.0));
        assert_eq!(b.bm25_score, Some(7.5));
        assert!((b.fused_score - (0.7 * 0.4 + 0.3)).abs() < 1e-12);

        let c = outcome.candidates.iter().find(|c| c.id == "c").unwrap();
        assert_eq!(c.vector_score, None);
        assert_eq!(c.lexical_score, Some(0.0));
    }

    #[test]
    fn test_semantic_query_is_vector_only() {
        let f = fusion(FusionConfig::default());
        let vector = vec![(entry("a"), 0.8)];
        let lexical = vec![(entry("b"), 3.0)];

        let outcome = f.fuse("what is nuclear power", &vector, &lexical);
        assert_eq!(outcome.mode, QueryMode::Semantic);
        assert_eq!(outcome.alpha, 1.0);
        let ids: Vec<&str> = outcome.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(outcome.candidates[0].fused_score, 0.8);
    }

    #[test]
    fn test_semantic_switch_can_be_disabled() {
        let f = fusion(FusionConfig {
            vector_only_on_semantic: false,
            ..FusionConfig::default()
        });
        let outcome = f.fuse("what is nuclear power", &[(entry("a"), 0.8)], &[(entry("b"), 3.0)]);
        assert_eq!(outcome.mode, QueryMode::Hybrid);
        assert_eq!(outcome.candidates.len(), 2);
    }

    #[test]
    fn test_vector_only_not_clamped() {
        let f = fusion(FusionConfig::default());
        let boosted = Arc::new(MemoryEntry::new(
            "x",
            "text",
            vec![0.0; 4],
            Metadata::new().with_role("expert").with_turn(1),
        ));

        let outcome = f.fuse("nuclear waste", &[(boosted, 0.95)], &[]);
        assert!(!outcome.lexical_signal);
        assert!(outcome.candidates[0].fused_score > 1.0);
    }

    #[test]
    fn test_fixed_alpha() {
        let f = fusion(FusionConfig {
            adaptive: false,
            default_alpha: 0.25,
            ..FusionConfig::default()
        });
        let outcome = f.fuse("nuclear", &[(entry("a"), 0.5)], &[(entry("a"), 2.0), (entry("b"), 1.0)]);
        assert_eq!(outcome.alpha, 0.25);
        let a = &outcome.candidates[0];
        assert_eq!(a.id, "a");
        assert!((a.fused_score - (0.25 * 0.5 + 0.75)).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_mode() {
        let f = fusion(FusionConfig {
            rrf_enabled: true,
            ..FusionConfig::default()
        });
        let vector = vec![(entry("a"), 0.9), (entry("b"), 0.5)];
        let lexical = vec![(entry("b"), 4.0), (entry("a"), 1.0)];

        let outcome = f.fuse("nuclear waste", &vector, &lexical);
        let a = outcome.candidates.iter().find(|c| c.id == "a").unwrap();
        let expected = (0.7 / 61.0 + 0.3 / 62.0) * 61.0;
        assert!((a.fused_score - expected).abs() < 1e-12);
        assert_eq!(outcome.candidates[0].id, "a");
        assert_eq!(a.bm25_score, Some(1.0));
    }

    #[test]
    fn test_rrf_scores_clear_default_threshold() {
        let f = fusion(FusionConfig {
            rrf_enabled: true,
            ..FusionConfig::default()
        });
        let vector = vec![(entry("a"), 0.9), (entry("b"), 0.5)];
        let lexical = vec![(entry("a"), 3.0), (entry("b"), 1.0)];

        let outcome = f.fuse("nuclear waste", &vector, &lexical);
        let top = &outcome.candidates[0];
        assert_eq!(top.id, "a");
        assert!((top.fused_score - 1.0).abs() < 1e-12);
        assert!(outcome.candidates.iter().all(|c| c.fused_score > 0.5 && c.fused_score <= 1.0));
    }

    #[test]
    fn test_ties_broken_by_id() {
        let f = fusion(FusionConfig::default());
        let vector = vec![(entry("b"), 0.5), (entry("a"), 0.5)];
        let outcome = f.fuse("nuclear", &vector, &[]);
        let ids: Vec<&str> = outcome.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
