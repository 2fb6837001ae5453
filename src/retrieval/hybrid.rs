//! Retrieval engine orchestrating ingest and hybrid search

use super::cancel::{CancellationToken, SearchStage};
use super::candidate::{renumber, RetrievalCandidate};
use super::context::{format_context, ContextStyle};
use super::features::FeatureExtractor;
use super::fusion::HybridFusion;
use super::reranker::{RerankError, RerankModel, Reranker};
use super::threshold::AdaptiveThreshold;
use crate::config::{Config, ConfigValidator, RetrievalConfig};
use crate::embedding::{
    BatchItem, BatchResult, Bm25Corpus, EmbeddingService, GuardedEmbedder, HnswParams,
    LexicalIndex, Tokenizer, VectorIndex, VectorIndexError, VectorSnapshot,
};
use crate::error::EvidraError;
use crate::memory::{Chunker, ChunkerConfig, MemoryEntry, Metadata, MetadataFilter};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Cannot index empty text")]
    EmptyText,

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Vector(#[from] VectorIndexError),
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search cancelled at stage {stage}")]
    Cancelled { stage: SearchStage },
}

/// Per-query search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Exact key/value equality against entry metadata
    pub filter_metadata: Option<MetadataFilter>,
    /// Base value for the adaptive threshold
    pub similarity_threshold: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 4,
            filter_metadata: None,
            similarity_threshold: 0.50,
        }
    }
}

impl SearchOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            filter_metadata: None,
            similarity_threshold: config.similarity_threshold,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter_metadata = Some(filter);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }
}

/// Per-insert chunking parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOptions {
    pub enable_chunking: bool,
    /// Texts longer than this many chars are chunked
    pub chunk_threshold: usize,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            enable_chunking: true,
            chunk_threshold: 500,
        }
    }
}

impl InsertOptions {
    pub fn from_config(config: &ChunkerConfig) -> Self {
        Self {
            enable_chunking: config.enabled,
            chunk_threshold: config.threshold,
        }
    }

    pub fn without_chunking() -> Self {
        Self {
            enable_chunking: false,
            ..Self::default()
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub backend: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub total_memories: usize,
    pub tombstones: usize,
    pub hybrid_enabled: bool,
    pub hybrid_vector_weight: f64,
    pub adaptive_fusion: bool,
    pub lexical_document_count: usize,
    pub rerank_enabled: bool,
}

struct Indices {
    vector: VectorIndex,
    lexical: LexicalIndex,
}

impl Indices {
    /// Remove `id` and every chunk whose parent is `id`
    fn remove(&mut self, id: &str) -> bool {
        let mut removed = false;
        for child in self.vector.children_of(id) {
            removed |= self.vector.remove(&child).is_ok();
            removed |= self.lexical.remove(&child);
        }
        removed |= self.vector.remove(id).is_ok();
        removed |= self.lexical.remove(id);
        removed
    }

    fn insert(&mut self, entry: MemoryEntry) -> Result<(), IndexError> {
        let id = entry.id.clone();
        let text = entry.text.clone();
        self.vector.insert(entry)?;
        if !self.lexical.add(&id, &text) {
            debug!("Entry {} has no lexical tokens, vector only", id);
        }
        Ok(())
    }
}

/// A row ready to embed and store
struct PendingRow {
    id: String,
    text: String,
    metadata: Metadata,
}

/// Query-time state shared with the blocking worker
struct Pipeline {
    fusion: HybridFusion,
    tokenizer: Tokenizer,
    oversample_factor: usize,
    hybrid_enabled: bool,
}

fn checkpoint(cancel: &CancellationToken, stage: SearchStage) -> Result<(), SearchError> {
    if cancel.is_cancelled() {
        debug!("Search cancelled before {}", stage);
        return Err(SearchError::Cancelled { stage });
    }
    Ok(())
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        query: &str,
        embedding: &[f32],
        vectors: &VectorSnapshot,
        corpus: &Bm25Corpus,
        options: &SearchOptions,
        reranker: Option<&Reranker>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievalCandidate>, SearchError> {
        checkpoint(cancel, SearchStage::Threshold)?;
        let tokens = self.tokenizer.tokenize(query);
        let threshold = AdaptiveThreshold::new(options.similarity_threshold).for_tokens(&tokens);
        let pool_size = options.top_k.saturating_mul(self.oversample_factor);
        let filter = options.filter_metadata.as_ref();

        checkpoint(cancel, SearchStage::VectorCandidates)?;
        let vector: Vec<(Arc<MemoryEntry>, f64)> = match vectors.collect(embedding, pool_size, filter) {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| {
                    let similarity = hit.similarity();
                    (hit.entry, similarity)
                })
                .collect(),
            Err(e) => {
                warn!("Vector search failed, continuing lexical only: {}", e);
                Vec::new()
            }
        };

        checkpoint(cancel, SearchStage::LexicalBlend)?;
        let lexical = if !self.hybrid_enabled {
            Vec::new()
        } else if corpus.is_empty() {
            warn!("Lexical corpus is empty, continuing vector only");
            Vec::new()
        } else {
            lexical_pool(corpus, vectors, &tokens, pool_size, filter)
        };

        let mut candidates = self.fusion.fuse(query, &vector, &lexical).candidates;

        if candidates.iter().any(|c| c.fused_score >= threshold) {
            candidates.retain(|c| c.fused_score >= threshold);
            renumber(&mut candidates);
        } else if !candidates.is_empty() {
            debug!(
                "Threshold {:.2} removed all {} candidates, keeping fused order",
                threshold,
                candidates.len()
            );
        }

        checkpoint(cancel, SearchStage::Rerank)?;
        if let Some(reranker) = reranker {
            candidates = reranker.rerank(query, candidates, Utc::now()).into_candidates();
        }

        checkpoint(cancel, SearchStage::Truncate)?;
        candidates.truncate(options.top_k);
        renumber(&mut candidates);

        Ok(candidates)
    }
}

/// Best `n` lexical matches that are live and pass `filter`
fn lexical_pool(
    corpus: &Bm25Corpus,
    vectors: &VectorSnapshot,
    tokens: &[String],
    n: usize,
    filter: Option<&MetadataFilter>,
) -> Vec<(Arc<MemoryEntry>, f64)> {
    let mut scored: Vec<(Arc<MemoryEntry>, f64)> = corpus
        .score(tokens)
        .into_iter()
        .filter_map(|(id, score)| {
            let entry = vectors.get(&id)?;
            if let Some(filter) = filter {
                if !entry.metadata.matches(filter) {
                    return None;
                }
            }
            Some((Arc::clone(entry), score))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    scored.truncate(n);
    scored
}

/// Hybrid evidence store
///
/// Mutations hold the write lock across both indices, so a reader always
/// sees the vector table and the lexical corpus from the same point in time.
pub struct RetrievalEngine {
    config: Config,
    indices: RwLock<Indices>,
    embedder: GuardedEmbedder,
    chunker: Chunker,
    pipeline: Arc<Pipeline>,
    reranker: RwLock<Option<Arc<Reranker>>>,
}

impl RetrievalEngine {
    /// Create an engine over `service`
    ///
    /// Fails when the configuration is invalid or the service dimension
    /// disagrees with `embedding.dimension`. A reranker model that cannot be
    /// loaded only disables reranking.
    pub fn new(config: Config, service: Arc<dyn EmbeddingService>) -> crate::Result<Self> {
        ConfigValidator::validate(&config)?;

        let dimension = config.embedding.dimension;
        if service.dimension() != dimension {
            return Err(EvidraError::DimensionMismatch {
                expected: dimension,
                actual: service.dimension(),
            });
        }

        let vector = VectorIndex::new(dimension, HnswParams::from(&config.indexing))?;
        let lexical = LexicalIndex::new(Tokenizer::new(), config.lexical);

        let fusion = HybridFusion::new(config.fusion.clone())
            .map_err(|e| EvidraError::Config(e.to_string()))?;

        let embedder = GuardedEmbedder::new(
            service,
            dimension,
            Duration::from_millis(config.embedding.timeout_ms),
            config.embedding.batch_size,
        );

        let reranker = if config.rerank.enabled {
            config
                .rerank
                .model_path
                .as_deref()
                .and_then(|path| match RerankModel::load(path, &config.rerank) {
                    Ok(model) => Some(Arc::new(Reranker::new(model, FeatureExtractor::default()))),
                    Err(e) => {
                        warn!("Reranking disabled: {}", e);
                        None
                    }
                })
        } else {
            None
        };

        info!(
            "Retrieval engine ready (model={}, dimension={}, hybrid={}, rerank={})",
            config.embedding.model,
            dimension,
            config.retrieval.hybrid_enabled,
            reranker.is_some()
        );

        Ok(Self {
            chunker: Chunker::new(&config.chunking),
            pipeline: Arc::new(Pipeline {
                fusion,
                tokenizer: Tokenizer::new(),
                oversample_factor: config.retrieval.oversample_factor.max(1),
                hybrid_enabled: config.retrieval.hybrid_enabled,
            }),
            indices: RwLock::new(Indices { vector, lexical }),
            embedder,
            reranker: RwLock::new(reranker),
            config,
        })
    }

    /// Use an already-built reranker instead of the configured model
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = RwLock::new(Some(Arc::new(reranker)));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Search options seeded from the `retrieval` config section
    pub fn default_search_options(&self) -> SearchOptions {
        SearchOptions::from_config(&self.config.retrieval)
    }

    /// Insert options seeded from the `chunking` config section
    pub fn default_insert_options(&self) -> InsertOptions {
        InsertOptions::from_config(&self.config.chunking)
    }

    /// Replace the reranker with the model at `path`
    ///
    /// On failure the current reranker stays in place.
    pub async fn reload_reranker(&self, path: &Path) -> Result<(), RerankError> {
        let model = RerankModel::load(path, &self.config.rerank)?;
        let reranker = Arc::new(Reranker::new(model, FeatureExtractor::default()));
        *self.reranker.write().await = Some(reranker);
        info!("Reranker reloaded from {:?}", path);
        Ok(())
    }

    pub async fn rerank_active(&self) -> bool {
        self.reranker
            .read()
            .await
            .as_ref()
            .is_some_and(|r| !r.is_disabled())
    }

    fn rows_for(
        &self,
        id: &str,
        text: &str,
        metadata: Metadata,
        options: InsertOptions,
    ) -> Vec<PendingRow> {
        let drafts = if options.enable_chunking {
            self.chunker.chunk(id, text, &metadata, options.chunk_threshold)
        } else {
            None
        };

        match drafts {
            Some(drafts) => drafts
                .into_iter()
                .map(|d| PendingRow {
                    id: d.id,
                    text: d.text,
                    metadata: d.metadata,
                })
                .collect(),
            None => vec![PendingRow {
                id: id.to_string(),
                text: text.to_string(),
                metadata,
            }],
        }
    }

    /// Store `text`, chunking it when long
    ///
    /// Returns the entry id, which is the parent id for chunked text. An
    /// existing entry with the same id is replaced.
    pub async fn insert(
        &self,
        text: &str,
        metadata: Metadata,
        id: Option<String>,
        options: InsertOptions,
    ) -> Result<String, IndexError> {
        if text.trim().is_empty() {
            return Err(IndexError::EmptyText);
        }

        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let rows = self.rows_for(&id, text, metadata, options);

        let texts: Vec<String> = rows.iter().map(|r| r.text.clone()).collect();
        let embedded = if texts.len() == 1 {
            vec![self.embedder.embed_text(&texts[0]).await]
        } else {
            self.embedder.embed_batch(&texts).await
        };

        let mut indices = self.indices.write().await;
        if indices.remove(&id) {
            debug!("Replacing existing entry {}", id);
        }

        let row_count = rows.len();
        for (row, embedding) in rows.into_iter().zip(embedded) {
            indices.insert(MemoryEntry::new(
                row.id,
                row.text,
                embedding.vector,
                row.metadata,
            ))?;
        }

        if row_count > 1 {
            info!("Stored {} as {} chunks", id, row_count);
        } else {
            debug!("Stored {}", id);
        }
        Ok(id)
    }

    /// Embed and store many items under one write lock
    pub async fn insert_batch(&self, items: Vec<BatchItem>) -> BatchResult {
        let start = Instant::now();
        let options = self.default_insert_options();
        let mut failed = 0usize;

        let mut groups: Vec<(String, Vec<PendingRow>)> = Vec::with_capacity(items.len());
        for item in items {
            if item.text.trim().is_empty() {
                warn!("Skipping batch item with empty text");
                failed += 1;
                continue;
            }
            let id = item.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let rows = self.rows_for(&id, &item.text, item.metadata, options);
            groups.push((id, rows));
        }

        let texts: Vec<String> = groups
            .iter()
            .flat_map(|(_, rows)| rows.iter().map(|r| r.text.clone()))
            .collect();
        let mut embedded = self.embedder.embed_batch(&texts).await.into_iter();

        let mut ids = Vec::with_capacity(groups.len());
        let mut degraded = 0usize;
        let mut indices = self.indices.write().await;

        for (id, rows) in groups {
            indices.remove(&id);
            let mut ok = true;
            let mut item_degraded = false;

            for row in rows {
                let Some(embedding) = embedded.next() else {
                    ok = false;
                    break;
                };
                item_degraded |= embedding.degraded;
                let entry = MemoryEntry::new(row.id, row.text, embedding.vector, row.metadata);
                if let Err(e) = indices.insert(entry) {
                    warn!("Failed to store batch item {}: {}", id, e);
                    ok = false;
                }
            }

            if ok {
                if item_degraded {
                    degraded += 1;
                }
                ids.push(id);
            } else {
                indices.remove(&id);
                failed += 1;
            }
        }
        drop(indices);

        let result = BatchResult {
            processed: ids.len(),
            ids,
            failed,
            degraded,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Batch insert: {} stored, {} failed, {} degraded in {}ms",
            result.processed, result.failed, result.degraded, result.duration_ms
        );
        result
    }

    /// Delete an entry; a parent id takes all of its chunks with it
    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.indices.write().await.remove(id);
        if removed {
            debug!("Deleted {}", id);
        } else {
            debug!("{}", IndexError::NotFound(id.to_string()));
        }
        removed
    }

    /// Rebuild the vector graph without tombstones
    pub async fn compact(&self) {
        self.indices.write().await.vector.compact();
    }

    pub async fn clear_all(&self) {
        let mut indices = self.indices.write().await;
        indices.vector.clear();
        indices.lexical.clear();
        info!("Cleared all memories");
    }

    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<RetrievalCandidate>, SearchError> {
        self.search_with_cancel(query, options, &CancellationToken::new())
            .await
    }

    /// Search, checking `cancel` at every stage boundary
    pub async fn search_with_cancel(
        &self,
        query: &str,
        options: SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievalCandidate>, SearchError> {
        checkpoint(cancel, SearchStage::Preprocess)?;
        let query = query.trim().to_string();
        if query.is_empty() || options.top_k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed_query(&query).await.vector;

        let (vectors, corpus) = {
            let indices = self.indices.read().await;
            (indices.vector.snapshot(), indices.lexical.snapshot())
        };
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        let reranker = self
            .reranker
            .read()
            .await
            .clone()
            .filter(|r| !r.is_disabled());
        let pipeline = Arc::clone(&self.pipeline);
        let worker_cancel = cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            pipeline.run(
                &query,
                &embedding,
                &vectors,
                &corpus,
                &options,
                reranker.as_deref(),
                &worker_cancel,
            )
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SearchError::Cancelled {
                stage: SearchStage::VectorCandidates,
            }),
        }
    }

    /// Run independent searches concurrently; results keep input order
    pub async fn search_many(
        self: &Arc<Self>,
        queries: Vec<String>,
        options: SearchOptions,
    ) -> Vec<Result<Vec<RetrievalCandidate>, SearchError>> {
        let mut set = JoinSet::new();
        for (i, query) in queries.into_iter().enumerate() {
            let engine = Arc::clone(self);
            let options = options.clone();
            set.spawn(async move { (i, engine.search(&query, options).await) });
        }

        let mut slots: Vec<Option<Result<Vec<RetrievalCandidate>, SearchError>>> =
            std::iter::repeat_with(|| None).take(set.len()).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, result)) => slots[i] = Some(result),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => warn!("Search task aborted: {}", e),
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or(Err(SearchError::Cancelled {
                    stage: SearchStage::Preprocess,
                }))
            })
            .collect()
    }

    /// Search and render the results for a downstream prompt
    pub async fn get_relevant_context(
        &self,
        query: &str,
        top_k: usize,
        style: ContextStyle,
    ) -> String {
        let options = self.default_search_options().with_top_k(top_k);
        match self.search(query, options).await {
            Ok(results) => format_context(&results, style),
            Err(e) => {
                warn!("Context retrieval failed: {}", e);
                String::new()
            }
        }
    }

    pub async fn get_stats(&self) -> StoreStats {
        let (total, tombstones, lexical) = {
            let indices = self.indices.read().await;
            (
                indices.vector.len(),
                indices.vector.tombstones(),
                indices.lexical.len(),
            )
        };

        StoreStats {
            backend: "hnsw+bm25".to_string(),
            embedding_model: self.embedder.service().model_name().to_string(),
            dimension: self.config.embedding.dimension,
            total_memories: total,
            tombstones,
            hybrid_enabled: self.config.retrieval.hybrid_enabled,
            hybrid_vector_weight: self.config.fusion.default_alpha,
            adaptive_fusion: self.config.fusion.adaptive,
            lexical_document_count: lexical,
            rerank_enabled: self.rerank_active().await,
        }
    }
}
