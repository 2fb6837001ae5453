//! Rendering retrieved evidence as prompt context

use super::candidate::RetrievalCandidate;
use std::fmt::Write;
use std::str::FromStr;

/// Layout of the context string handed to a downstream agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextStyle {
    /// One numbered line per passage
    #[default]
    Compact,
    /// Passage with score and speaker header
    Detailed,
    /// Passages with inline markers and a source list
    Citation,
}

impl FromStr for ContextStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(ContextStyle::Compact),
            "detailed" => Ok(ContextStyle::Detailed),
            "citation" => Ok(ContextStyle::Citation),
            other => Err(format!("Unknown context style: {}", other)),
        }
    }
}

fn speaker(candidate: &RetrievalCandidate) -> String {
    let mut parts = Vec::new();
    if let Some(role) = &candidate.metadata.role {
        parts.push(format!("role: {}", role));
    }
    if let Some(turn) = candidate.metadata.turn {
        parts.push(format!("turn: {}", turn));
    }
    parts.join(", ")
}

/// Render candidates in rank order; empty input gives an empty string
pub fn format_context(candidates: &[RetrievalCandidate], style: ContextStyle) -> String {
    let mut out = String::new();

    match style {
        ContextStyle::Compact => {
            for c in candidates {
                let _ = writeln!(out, "[{}] {}", c.rank, c.text.trim());
            }
        }
        ContextStyle::Detailed => {
            for c in candidates {
                let who = speaker(c);
                if who.is_empty() {
                    let _ = writeln!(out, "[{}] (score: {:.3})", c.rank, c.final_score);
                } else {
                    let _ = writeln!(out, "[{}] (score: {:.3}, {})", c.rank, c.final_score, who);
                }
                let _ = writeln!(out, "{}\n", c.text.trim());
            }
        }
        ContextStyle::Citation => {
            for c in candidates {
                let _ = writeln!(out, "{} [{}]", c.text.trim(), c.rank);
            }
            if !candidates.is_empty() {
                out.push_str("\nSources:\n");
                for c in candidates {
                    let who = speaker(c);
                    if who.is_empty() {
                        let _ = writeln!(out, "[{}] {}", c.rank, c.id);
                    } else {
                        let _ = writeln!(out, "[{}] {} ({})", c.rank, c.id, who);
                    }
                }
            }
        }
    }

    out.trim_end().to_string()
}
