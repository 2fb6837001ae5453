/// BM25 lexical index over tokenized documents
///
/// The corpus statistics live in an immutable [`Bm25Corpus`] behind an `Arc`.
/// Every mutation builds a complete replacement and swaps the pointer, so a
/// reader holding a snapshot never sees a partially rebuilt index.
use super::Tokenizer;
use ahash::{HashMap, HashMapExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// BM25 Okapi parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f64,
    /// Document-length normalization
    pub b: f64,
    /// Negative idf values are floored at `epsilon * mean_idf`
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
struct LexicalDocument {
    id: String,
    tokens: Vec<String>,
}

/// Immutable corpus plus derived BM25 statistics
#[derive(Debug)]
pub struct Bm25Corpus {
    docs: Vec<LexicalDocument>,
    term_freqs: Vec<HashMap<String, u32>>,
    positions: HashMap<String, usize>,
    idf: BTreeMap<String, f64>,
    avg_len: f64,
    params: Bm25Params,
}

impl Bm25Corpus {
    fn build(docs: Vec<LexicalDocument>, params: Bm25Params) -> Self {
        let mut term_freqs = Vec::with_capacity(docs.len());
        let mut positions = HashMap::with_capacity(docs.len());
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_len = 0usize;

        for (pos, doc) in docs.iter().enumerate() {
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in &doc.tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += doc.tokens.len();
            positions.insert(doc.id.clone(), pos);
            term_freqs.push(tf);
        }

        let n = docs.len() as f64;
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / n
        };

        // Okapi idf; terms in more than half the corpus go negative
        let mut idf = BTreeMap::new();
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, df) in &doc_freq {
            let df = *df as f64;
            let value = (n - df + 0.5).ln() - (df + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }

        if !doc_freq.is_empty() {
            let floor = params.epsilon * (idf_sum / doc_freq.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            docs,
            term_freqs,
            positions,
            idf,
            avg_len,
            params,
        }
    }

    fn empty(params: Bm25Params) -> Self {
        Self::build(Vec::new(), params)
    }

    /// BM25 score of every document sharing at least one query term
    ///
    /// Scores are raw and may be negative.
    pub fn score(&self, query_tokens: &[String]) -> HashMap<String, f64> {
        let mut scores: HashMap<String, f64> = HashMap::new();
        if self.docs.is_empty() || query_tokens.is_empty() {
            return scores;
        }

        let Bm25Params { k1, b, .. } = self.params;

        for (doc, tf) in self.docs.iter().zip(&self.term_freqs) {
            let dl = doc.tokens.len() as f64;
            let norm = k1 * (1.0 - b + b * dl / self.avg_len);
            let mut total = 0.0;
            let mut matched = false;

            for token in query_tokens {
                let Some(&freq) = tf.get(token) else {
                    continue;
                };
                matched = true;
                let freq = freq as f64;
                let idf = self.idf.get(token).copied().unwrap_or(0.0);
                total += idf * freq * (k1 + 1.0) / (freq + norm);
            }

            if matched {
                scores.insert(doc.id.clone(), total);
            }
        }

        scores
    }

    /// The `n` best-scoring documents, ties broken by id
    pub fn top(&self, query_tokens: &[String], n: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self.score(query_tokens).into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(n);
        ranked
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    pub fn avg_len(&self) -> f64 {
        self.avg_len
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Document ids in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.docs.iter().map(|d| d.id.as_str())
    }
}

/// Mutable handle owning the current corpus snapshot
pub struct LexicalIndex {
    corpus: Arc<Bm25Corpus>,
    tokenizer: Tokenizer,
    params: Bm25Params,
}

impl LexicalIndex {
    pub fn new(tokenizer: Tokenizer, params: Bm25Params) -> Self {
        Self {
            corpus: Arc::new(Bm25Corpus::empty(params)),
            tokenizer,
            params,
        }
    }

    /// Index `text` under `id`, replacing any previous document with that id
    ///
    /// Returns false (and leaves the index untouched) when the text has no tokens.
    pub fn add(&mut self, id: &str, text: &str) -> bool {
        let tokens = self.tokenizer.tokenize(text);
        if tokens.is_empty() {
            tracing::debug!("Skipping lexical indexing of '{}': no tokens", id);
            return false;
        }

        let mut docs: Vec<LexicalDocument> = self
            .corpus
            .docs
            .iter()
            .filter(|d| d.id != id)
            .cloned()
            .collect();
        docs.push(LexicalDocument {
            id: id.to_string(),
            tokens,
        });

        self.swap(docs);
        true
    }

    /// Remove a document and rebuild; false if the id was not indexed
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.corpus.contains(id) {
            return false;
        }

        // TODO: incremental postings removal instead of a full rebuild
        let docs: Vec<LexicalDocument> = self
            .corpus
            .docs
            .iter()
            .filter(|d| d.id != id)
            .cloned()
            .collect();

        self.swap(docs);
        true
    }

    pub fn clear(&mut self) {
        self.corpus = Arc::new(Bm25Corpus::empty(self.params));
    }

    fn swap(&mut self, docs: Vec<LexicalDocument>) {
        self.corpus = Arc::new(Bm25Corpus::build(docs, self.params));
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<Bm25Corpus> {
        Arc::clone(&self.corpus)
    }

    pub fn score(&self, query_tokens: &[String]) -> HashMap<String, f64> {
        self.corpus.score(query_tokens)
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(Tokenizer::new(), Bm25Params::default())
    }
}
