//! Query-complexity-aware similarity cutoff

/// Default base cutoff
pub const DEFAULT_BASE_THRESHOLD: f64 = 0.50;

/// Adjusts the similarity cutoff by query length
///
/// Short queries are ambiguous and match too much, so the bar goes up.
/// Long queries are specific, so it comes down to keep recall.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveThreshold {
    base: f64,
}

impl AdaptiveThreshold {
    pub fn new(base: f64) -> Self {
        Self { base }
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// Floors never lift a long-query cutoff above the shorter band's value,
    /// so for a low `base` the cutoff stays flat instead of rising.
    pub fn for_token_count(&self, token_count: usize) -> f64 {
        let medium = (self.base - 0.05).max(0.40).min(self.base);
        match token_count {
            0..=2 => (self.base + 0.10).min(0.85),
            3..=4 => self.base,
            5..=8 => medium,
            _ => (self.base - 0.10).max(0.35).min(medium),
        }
    }

    pub fn for_tokens(&self, tokens: &[String]) -> f64 {
        self.for_token_count(tokens.len())
    }
}

impl Default for AdaptiveThreshold {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bands() {
        let t = AdaptiveThreshold::default();
        assert!((t.for_token_count(1) - 0.60).abs() < 1e-12);
        assert_eq!(t.for_token_count(3), 0.50);
        assert_eq!(t.for_token_count(4), 0.50);
        assert!((t.for_token_count(6) - 0.45).abs() < 1e-12);
        assert!((t.for_token_count(12) - 0.40).abs() < 1e-12);
    }

    #[test]
    fn test_caps_and_floors() {
        let high = AdaptiveThreshold::new(0.80);
        assert_eq!(high.for_token_count(0), 0.85);

        let floor = AdaptiveThreshold::new(0.42);
        assert_eq!(floor.for_token_count(7), 0.40);
        assert_eq!(floor.for_token_count(20), 0.35);

        // floors do not raise the bar above base
        let low = AdaptiveThreshold::new(0.30);
        assert_eq!(low.for_token_count(7), 0.30);
        assert_eq!(low.for_token_count(20), 0.30);
    }

    #[test]
    fn test_non_increasing_after_two_tokens() {
        for base in [0.0, 0.3, 0.5, 0.7, 1.0] {
            let t = AdaptiveThreshold::new(base);
            let mut previous = t.for_token_count(3);
            for count in 4..64 {
                let current = t.for_token_count(count);
                assert!(
                    current <= previous,
                    "base {} rose from {} to {} at {} tokens",
                    base,
                    previous,
                    current,
                    count
                );
                previous = current;
            }
        }
    }
}
