//! Multiplicative boost from entry metadata

use crate::memory::Metadata;

const RECENCY_WEIGHT: f64 = 0.15;
/// Turns beyond this get no recency boost
const RECENCY_HORIZON: f64 = 100.0;
const AUTHORITATIVE_ROLES: &[&str] = &["researcher", "expert", "analyst"];
const AUTHORITATIVE_FACTOR: f64 = 1.10;
const PARTICIPANT_ROLES: &[&str] = &["user", "assistant"];
const PARTICIPANT_FACTOR: f64 = 1.05;

/// Boost derived from debate turn and speaker role
///
/// Applied once per candidate, after fusion and before the final sort.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataBooster;

impl MetadataBooster {
    pub fn boost(metadata: &Metadata) -> f64 {
        let mut boost = 1.0;

        if let Some(turn) = metadata.turn.filter(|t| *t > 0) {
            let decay = (turn as f64 / RECENCY_HORIZON).min(1.0);
            boost *= 1.0 + RECENCY_WEIGHT * (1.0 - decay);
        }

        if let Some(role) = metadata.role_normalized() {
            if AUTHORITATIVE_ROLES.contains(&role.as_str()) {
                boost *= AUTHORITATIVE_FACTOR;
            } else if PARTICIPANT_ROLES.contains(&role.as_str()) {
                boost *= PARTICIPANT_FACTOR;
            }
        }

        boost
    }
}
