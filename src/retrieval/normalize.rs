//! Batch score normalization

/// Normalize a batch of scores onto [0, 1]
///
/// Scores that already lie in [0, 1] pass through unchanged so similarities
/// keep their absolute meaning. Anything else (raw BM25, which may be
/// negative or exceed 1) is min-max shifted across the batch.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
        return scores.to_vec();
    }
    min_max_normalize(scores)
}

/// `(raw - min) / (max - min)`, with every score mapped to 0 when `max == min`
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if range <= f64::EPSILON {
        return vec![0.0; scores.len()];
    }

    scores.iter().map(|s| (s - min) / range).collect()
}
