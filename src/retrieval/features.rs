//! Fixed-schema feature extraction for the learned reranker

use super::boost::MetadataBooster;
use super::candidate::RetrievalCandidate;
use crate::embedding::Tokenizer;
use ahash::HashSet;
use chrono::{DateTime, Utc};
use ndarray::Array2;

/// Column order of the feature matrix; model artifacts must list exactly these
pub const FEATURE_NAMES: [&str; 11] = [
    "vector_sim",
    "bm25_score",
    "recency_days",
    "authority_score",
    "role_match",
    "text_length",
    "metadata_boost",
    "query_term_overlap",
    "position_rank",
    "semantic_density",
    "hybrid_score",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Recency used when an entry has no timestamp
const MISSING_RECENCY_DAYS: f64 = 3650.0;
const UNKNOWN_AUTHORITY: f64 = 0.4;

const KNOWN_ROLES: &[&str] = &[
    "proponent",
    "opponent",
    "affirmative",
    "negative",
    "user",
    "assistant",
    "researcher",
    "expert",
    "analyst",
    "moderator",
    "judge",
];

const OPPOSITE_ROLES: &[(&str, &str)] = &[
    ("proponent", "opponent"),
    ("affirmative", "negative"),
    ("user", "assistant"),
];

fn authority_of(source: &str) -> f64 {
    match source {
        "researcher" => 1.0,
        "expert" => 0.9,
        "government" => 0.85,
        "news" => 0.8,
        "user" => 0.3,
        _ => UNKNOWN_AUTHORITY,
    }
}

fn are_opposites(a: &str, b: &str) -> bool {
    OPPOSITE_ROLES
        .iter()
        .any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
}

/// Builds one feature row per candidate
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    tokenizer: Tokenizer,
}

impl FeatureExtractor {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    /// First debate role named in the query ("opponents" counts as "opponent")
    pub fn query_role(&self, query: &str) -> Option<&'static str> {
        self.tokenizer.tokenize(query).iter().find_map(|token| {
            let singular = token.strip_suffix('s').unwrap_or(token);
            KNOWN_ROLES
                .iter()
                .find(|role| **role == token.as_str() || **role == singular)
                .copied()
        })
    }

    /// `candidates.len() x FEATURE_COUNT` matrix in [`FEATURE_NAMES`] order
    ///
    /// Row `i` describes `candidates[i]`; its `position_rank` reflects `i`.
    pub fn extract(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
        now: DateTime<Utc>,
    ) -> Array2<f64> {
        let query_terms: HashSet<String> = self.tokenizer.tokenize(query).into_iter().collect();
        let query_role = self.query_role(query);

        let mut features = Array2::<f64>::zeros((candidates.len(), FEATURE_COUNT));

        for (position, candidate) in candidates.iter().enumerate() {
            let vector_sim = candidate.vector_score.unwrap_or(0.0);
            let text_length = candidate.text.chars().count() as f64;

            let recency_days = candidate
                .metadata
                .timestamp
                .map(|ts| ((now - ts).num_seconds() as f64 / 86_400.0).max(0.0))
                .unwrap_or(MISSING_RECENCY_DAYS);

            let authority = candidate
                .metadata
                .authority
                .as_deref()
                .or(candidate.metadata.role.as_deref())
                .map(|source| authority_of(&source.trim().to_lowercase()))
                .unwrap_or(UNKNOWN_AUTHORITY);

            let role_match = match (query_role, candidate.metadata.role_normalized()) {
                (Some(wanted), Some(role)) if role == wanted => 1.0,
                (Some(wanted), Some(role)) if are_opposites(wanted, &role) => 0.5,
                _ => 0.0,
            };

            let overlap = if query_terms.is_empty() {
                0.0
            } else {
                let doc_terms: HashSet<String> =
                    self.tokenizer.tokenize(&candidate.text).into_iter().collect();
                query_terms.intersection(&doc_terms).count() as f64 / query_terms.len() as f64
            };

            let semantic_density = if text_length > 0.0 {
                vector_sim / (text_length / 100.0)
            } else {
                0.0
            };

            let row = [
                vector_sim,
                candidate.bm25_score.unwrap_or(0.0),
                recency_days,
                authority,
                role_match,
                text_length,
                MetadataBooster::boost(&candidate.metadata),
                overlap,
                1.0 / (1.0 + position as f64),
                semantic_density,
                candidate.fused_score,
            ];
            for (col, value) in row.into_iter().enumerate() {
                features[[position, col]] = value;
            }
        }

        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Metadata;
    use crate::retrieval::candidate::candidate;
    use chrono::Duration;

    fn column(name: &str) -> usize {
        FEATURE_NAMES.iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn test_shape_and_order() {
        let extractor = FeatureExtractor::default();
        let list = vec![candidate("a", 0.9), candidate("b", 0.4)];
        let m = extractor.extract("nuclear waste", &list, Utc::now());

        assert_eq!(m.shape(), &[2, FEATURE_COUNT]);
        assert_eq!(m[[0, column("position_rank")]], 1.0);
        assert_eq!(m[[1, column("position_rank")]], 0.5);
        assert_eq!(m[[0, column("hybrid_score")]], 0.9);
        assert_eq!(m[[1, column("vector_sim")]], 0.4);
    }

    #[test]
    fn test_recency_and_authority() {
        let now = Utc::now();
        let mut dated = candidate("a", 0.5);
        dated.metadata = Metadata::new()
            .with_timestamp(now - Duration::days(10))
            .with_authority("Government");
        let mut by_role = candidate("b", 0.5);
        by_role.metadata = Metadata::new().with_role("researcher");
        let bare = candidate("c", 0.5);

        let m = FeatureExtractor::default().extract("q", &[dated, by_role, bare], now);
        assert!((m[[0, column("recency_days")]] - 10.0).abs() < 1e-6);
        assert_eq!(m[[0, column("authority_score")]], 0.85);
        assert_eq!(m[[1, column("authority_score")]], 1.0);
        assert_eq!(m[[2, column("recency_days")]], 3650.0);
        assert_eq!(m[[2, column("authority_score")]], 0.4);
    }

    #[test]
    fn test_role_match() {
        let extractor = FeatureExtractor::default();
        assert_eq!(extractor.query_role("what did the opponents argue"), Some("opponent"));
        assert_eq!(extractor.query_role("nuclear waste"), None);

        let mut same = candidate("a", 0.5);
        same.metadata = Metadata::new().with_role("Opponent");
        let mut opposite = candidate("b", 0.5);
        opposite.metadata = Metadata::new().with_role("proponent");
        let mut other = candidate("c", 0.5);
        other.metadata = Metadata::new().with_role("judge");

        let m = extractor.extract("opponent on waste", &[same, opposite, other], Utc::now());
        let col = column("role_match");
        assert_eq!(m[[0, col]], 1.0);
        assert_eq!(m[[1, col]], 0.5);
        assert_eq!(m[[2, col]], 0.0);
    }

    #[test]
    fn test_overlap_and_density() {
        let mut c = candidate("a", 0.5);
        c.text = "nuclear waste storage".to_string();
        c.vector_score = Some(0.42);
        let mut empty = candidate("b", 0.5);
        empty.text = String::new();

        let m = FeatureExtractor::default().extract("nuclear energy", &[c, empty], Utc::now());
        assert_eq!(m[[0, column("query_term_overlap")]], 0.5);
        assert_eq!(m[[0, column("text_length")]], 21.0);
        assert!((m[[0, column("semantic_density")]] - 0.42 / 0.21).abs() < 1e-9);
        assert_eq!(m[[1, column("semantic_density")]], 0.0);
    }

    #[test]
    fn test_bm25_column_is_raw_score() {
        let mut lexical = candidate("a", 0.5);
        lexical.lexical_score = Some(1.0);
        lexical.bm25_score = Some(-0.37);
        let vector_only = candidate("b", 0.5);

        let m = FeatureExtractor::default().extract("q", &[lexical, vector_only], Utc::now());
        assert_eq!(m[[0, column("bm25_score")]], -0.37);
        assert_eq!(m[[1, column("bm25_score")]], 0.0);
    }
}
