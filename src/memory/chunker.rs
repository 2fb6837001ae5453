//! Splits long documents into linked child entries

use crate::memory::Metadata;
use serde::{Deserialize, Serialize};

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub enabled: bool,
    /// Texts longer than this (in chars) are chunked
    pub threshold: usize,
    /// Maximum chunk length in chars; must not exceed `threshold`
    pub chunk_size: usize,
    /// Trailing sentences of one chunk repeated at the start of the next
    pub overlap_sentences: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 500,
            chunk_size: 400,
            overlap_sentences: 1,
        }
    }
}

/// A chunk ready to be embedded and stored
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// Sentence-packing chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap_sentences: usize,
}

impl Chunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            overlap_sentences: config.overlap_sentences,
        }
    }

    /// Id of the `index`-th chunk of `parent_id`
    pub fn chunk_id(parent_id: &str, index: usize) -> String {
        format!("{}_chunk_{}", parent_id, index)
    }

    /// Chunk `text` if it is longer than `threshold` chars
    ///
    /// Returns `None` for short texts. Otherwise returns at least two drafts,
    /// each carrying the parent's metadata plus the chunk linkage fields.
    pub fn chunk(
        &self,
        parent_id: &str,
        text: &str,
        metadata: &Metadata,
        threshold: usize,
    ) -> Option<Vec<ChunkDraft>> {
        if text.chars().count() <= threshold {
            return None;
        }

        let size = self.chunk_size.min(threshold.max(1));
        let pieces = self.split(text, size);
        if pieces.len() < 2 {
            return None;
        }

        let total = pieces.len() as u32;
        let drafts = pieces
            .into_iter()
            .enumerate()
            .map(|(index, chunk_text)| {
                let mut chunk_meta = metadata.clone();
                chunk_meta.parent_id = Some(parent_id.to_string());
                chunk_meta.chunk_index = Some(index as u32);
                chunk_meta.total_chunks = Some(total);
                chunk_meta.is_chunk = true;

                ChunkDraft {
                    id: Self::chunk_id(parent_id, index),
                    text: chunk_text,
                    metadata: chunk_meta,
                }
            })
            .collect();

        Some(drafts)
    }

    /// Pack sentences into chunks of at most `size` chars
    pub fn split(&self, text: &str, size: usize) -> Vec<String> {
        let mut pieces = Vec::new();
        for sentence in split_sentences(text) {
            if char_len(&sentence) > size {
                pieces.extend(hard_split(&sentence, size));
            } else {
                pieces.push(sentence);
            }
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for piece in pieces {
            let piece_len = char_len(&piece);
            let joined_len = if current.is_empty() {
                piece_len
            } else {
                current_len + 1 + piece_len
            };

            if joined_len > size && !current.is_empty() {
                chunks.push(current.join(" "));

                // carry trailing sentences forward while they still fit
                let keep_from = current.len().saturating_sub(self.overlap_sentences);
                let mut carried: Vec<String> = current.split_off(keep_from);
                while !carried.is_empty() && joined_length(&carried) + 1 + piece_len > size {
                    carried.remove(0);
                }
                current = carried;
                current_len = joined_length(&current);
            }

            current_len = if current.is_empty() {
                piece_len
            } else {
                current_len + 1 + piece_len
            };
            current.push(piece);
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }

        if chunks.len() == 1 {
            // whitespace-heavy text can collapse into one chunk; halve it
            let only = chunks.remove(0);
            return split_in_half(&only);
        }

        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn joined_length(parts: &[String]) -> usize {
    if parts.is_empty() {
        return 0;
    }
    parts.iter().map(|p| char_len(p)).sum::<usize>() + parts.len() - 1
}

/// Sentence boundaries: `.`, `!` or `?` followed by whitespace, and newlines
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_trimmed(&mut sentences, &current);
            current.clear();
            continue;
        }

        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if at_boundary {
                push_trimmed(&mut sentences, &current);
                current.clear();
            }
        }
    }
    push_trimmed(&mut sentences, &current);

    sentences
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let trimmed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Split an oversized sentence on word boundaries, then on chars for giant words
fn hard_split(sentence: &str, size: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for word in sentence.split_whitespace() {
        if char_len(word) > size {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            for window in chars.chunks(size) {
                out.push(window.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            char_len(word)
        } else {
            char_len(&current) + 1 + char_len(word)
        };
        if needed > size {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_in_half(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() >= 2 {
        let mid = words.len() / 2;
        return vec![words[..mid].join(" "), words[mid..].join(" ")];
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 2 {
        return vec![text.to_string()];
    }
    let mid = chars.len() / 2;
    vec![
        chars[..mid].iter().collect(),
        chars[mid..].iter().collect(),
    ]
}
