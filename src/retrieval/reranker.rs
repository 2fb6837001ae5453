//! Learning-to-rank reranking with a pretrained calibrated classifier
//!
//! The model artifact is JSON:
//!
//! ```json
//! {
//!   "feature_names": ["vector_sim", "bm25_score", ...],
//!   "classifier": {
//!     "type": "logistic",
//!     "coefficients": [...],
//!     "intercept": -0.4,
//!     "scaler": { "mean": [...], "scale": [...] },
//!     "calibration": { "a": -1.7, "b": 0.1 }
//!   }
//! }
//! ```
//!
//! `feature_names` must match [`FEATURE_NAMES`] exactly. `scaler` and
//! `calibration` are optional. `bm25_score` is the raw Okapi score, not the
//! batch-normalized one, and is 0 for candidates with no lexical match.

use super::candidate::{sort_and_rank, RetrievalCandidate};
use super::features::{FeatureExtractor, FEATURE_NAMES};
use super::normalize::min_max_normalize;
use crate::config::RerankConfig;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Failed to read rerank model {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rerank model: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Feature schema mismatch: model expects {expected:?}")]
    SchemaMismatch { expected: Vec<String> },

    #[error("Feature count mismatch: classifier expects {expected}, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("Invalid classifier: {0}")]
    InvalidClassifier(String),
}

/// Classifier producing a positive-class probability per feature row
pub trait ProbabilisticClassifier: Send + Sync + fmt::Debug {
    fn n_features(&self) -> usize;

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>, RerankError>;
}

/// Per-feature standardization `(x - mean) / scale`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Platt scaling over the decision value: `p = 1 / (1 + exp(a * z + b))`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SigmoidCalibration {
    pub a: f64,
    pub b: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    #[serde(default)]
    pub calibration: Option<SigmoidCalibration>,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl LogisticClassifier {
    fn validate(&self) -> Result<(), RerankError> {
        if let Some(scaler) = &self.scaler {
            let n = self.coefficients.len();
            if scaler.mean.len() != n || scaler.scale.len() != n {
                return Err(RerankError::InvalidClassifier(format!(
                    "scaler has {} means and {} scales for {} coefficients",
                    scaler.mean.len(),
                    scaler.scale.len(),
                    n
                )));
            }
        }
        Ok(())
    }
}

impl ProbabilisticClassifier for LogisticClassifier {
    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>, RerankError> {
        if features.ncols() != self.n_features() {
            return Err(RerankError::FeatureCountMismatch {
                expected: self.n_features(),
                actual: features.ncols(),
            });
        }

        let mut x = features.clone();
        if let Some(scaler) = &self.scaler {
            for mut row in x.rows_mut() {
                for (j, value) in row.iter_mut().enumerate() {
                    let scale = if scaler.scale[j] == 0.0 { 1.0 } else { scaler.scale[j] };
                    *value = (*value - scaler.mean[j]) / scale;
                }
            }
        }

        let coefficients = Array1::from(self.coefficients.clone());
        let decision = x.dot(&coefficients) + self.intercept;

        Ok(match self.calibration {
            Some(SigmoidCalibration { a, b }) => decision.mapv(|z| 1.0 / (1.0 + (a * z + b).exp())),
            None => decision.mapv(sigmoid),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClassifierArtifact {
    Logistic(LogisticClassifier),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelArtifact {
    feature_names: Vec<String>,
    classifier: ClassifierArtifact,
}

/// Immutable pretrained model plus its blending weights
#[derive(Debug, Clone)]
pub struct RerankModel {
    pub feature_names: Vec<String>,
    pub classifier: Arc<dyn ProbabilisticClassifier>,
    pub vector_weight: f64,
    pub rerank_weight: f64,
    pub confidence_threshold: f64,
}

impl RerankModel {
    /// Load a JSON artifact and check its feature schema
    pub fn load(path: &Path, config: &RerankConfig) -> Result<Self, RerankError> {
        let content = std::fs::read_to_string(path).map_err(|source| RerankError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&content)?;

        if artifact.feature_names != FEATURE_NAMES {
            return Err(RerankError::SchemaMismatch {
                expected: artifact.feature_names,
            });
        }

        let classifier: Arc<dyn ProbabilisticClassifier> = match artifact.classifier {
            ClassifierArtifact::Logistic(logistic) => {
                logistic.validate()?;
                Arc::new(logistic)
            }
        };

        info!(
            "Loaded rerank model from {:?} ({} features)",
            path,
            classifier.n_features()
        );

        Ok(Self::from_classifier(classifier, config))
    }

    /// Wrap an in-memory classifier using the standard feature schema
    pub fn from_classifier(
        classifier: Arc<dyn ProbabilisticClassifier>,
        config: &RerankConfig,
    ) -> Self {
        Self {
            feature_names: FEATURE_NAMES.iter().map(|n| n.to_string()).collect(),
            classifier,
            vector_weight: config.vector_weight,
            rerank_weight: config.rerank_weight,
            confidence_threshold: config.confidence_threshold,
        }
    }
}

/// What the rerank stage did with its input
#[derive(Debug, Clone)]
pub enum RerankOutcome {
    /// Rescored, filtered by confidence and re-sorted
    Reranked(Vec<RetrievalCandidate>),
    /// Every candidate fell below the confidence threshold; input order kept
    Fallback(Vec<RetrievalCandidate>),
    /// Reranking did not run; input returned untouched
    Skipped(Vec<RetrievalCandidate>),
}

impl RerankOutcome {
    pub fn into_candidates(self) -> Vec<RetrievalCandidate> {
        match self {
            RerankOutcome::Reranked(c) | RerankOutcome::Fallback(c) | RerankOutcome::Skipped(c) => c,
        }
    }

    pub fn is_reranked(&self) -> bool {
        matches!(self, RerankOutcome::Reranked(_))
    }
}

/// Learning-to-rank stage
///
/// A classifier that rejects the feature matrix disables the reranker for
/// the rest of the session; queries never fail because of it.
#[derive(Debug)]
pub struct Reranker {
    model: RerankModel,
    extractor: FeatureExtractor,
    disabled: AtomicBool,
}

impl Reranker {
    pub fn new(model: RerankModel, extractor: FeatureExtractor) -> Self {
        Self {
            model,
            extractor,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &RerankModel {
        &self.model
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    fn disable(&self, reason: &RerankError) {
        error!("Disabling reranker for this session: {}", reason);
        self.disabled.store(true, Ordering::Relaxed);
    }

    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievalCandidate>,
        now: DateTime<Utc>,
    ) -> RerankOutcome {
        if self.is_disabled() || candidates.len() < 2 {
            return RerankOutcome::Skipped(candidates);
        }

        let features = self.extractor.extract(query, &candidates, now);
        let expected = self.model.classifier.n_features();
        if features.ncols() != expected {
            self.disable(&RerankError::FeatureCountMismatch {
                expected,
                actual: features.ncols(),
            });
            return RerankOutcome::Skipped(candidates);
        }

        let probabilities = match self.model.classifier.predict_proba(&features) {
            Ok(p) if p.len() == candidates.len() => p.to_vec(),
            Ok(p) => {
                self.disable(&RerankError::InvalidClassifier(format!(
                    "{} probabilities for {} rows",
                    p.len(),
                    candidates.len()
                )));
                return RerankOutcome::Skipped(candidates);
            }
            Err(e) => {
                self.disable(&e);
                return RerankOutcome::Skipped(candidates);
            }
        };

        let hybrid: Vec<f64> = candidates.iter().map(|c| c.fused_score).collect();
        let hybrid_norm = min_max_normalize(&hybrid);
        let p_norm = min_max_normalize(&probabilities);

        let mut kept: Vec<RetrievalCandidate> = candidates
            .iter()
            .zip(probabilities.iter().zip(hybrid_norm.iter().zip(p_norm.iter())))
            .filter(|(_, (p, _))| **p >= self.model.confidence_threshold)
            .map(|(candidate, (p, (h, pn)))| {
                let mut c = candidate.clone();
                c.rerank_score = Some(*p);
                c.final_score = self.model.vector_weight * h + self.model.rerank_weight * pn;
                c
            })
            .collect();

        if kept.is_empty() {
            debug!(
                "All {} candidates below rerank confidence {}, keeping fused order",
                candidates.len(),
                self.model.confidence_threshold
            );
            return RerankOutcome::Fallback(candidates);
        }

        sort_and_rank(&mut kept);
        debug!("Reranked {} -> {} candidates", candidates.len(), kept.len());
        RerankOutcome::Reranked(kept)
    }
}
