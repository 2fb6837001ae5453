/// Time-bounded embedding calls with zero-vector degradation
use super::{EmbeddingError, EmbeddingService};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Item to be ingested in a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: Option<String>,
    pub text: String,
    pub metadata: crate::memory::Metadata,
}

impl BatchItem {
    pub fn new(text: impl Into<String>, metadata: crate::memory::Metadata) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Result of batch ingestion
#[derive(Debug)]
pub struct BatchResult {
    /// Ids returned for each successfully stored item, in input order
    pub ids: Vec<String>,
    pub processed: usize,
    pub failed: usize,
    /// Items stored with a zero vector because embedding failed
    pub degraded: usize,
    pub duration_ms: u64,
}

/// Output of a guarded embedding call
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vector: Vec<f32>,
    /// True when the service failed and `vector` is all zeros
    pub degraded: bool,
}

/// Wraps an [`EmbeddingService`] so every call is bounded by a timeout,
/// runs on the blocking pool, and never fails: errors become zero vectors.
#[derive(Clone)]
pub struct GuardedEmbedder {
    service: Arc<dyn EmbeddingService>,
    timeout: Duration,
    batch_size: usize,
    dimension: usize,
}

impl GuardedEmbedder {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        dimension: usize,
        timeout: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            service,
            timeout,
            batch_size: batch_size.max(1),
            dimension,
        }
    }

    pub fn service(&self) -> &Arc<dyn EmbeddingService> {
        &self.service
    }

    pub async fn embed_query(&self, query: &str) -> Embedded {
        let query = query.to_string();
        let result = self
            .run(move |service| service.embed_query(&query))
            .await
            .and_then(|v| self.check(v));
        self.settle("query", result)
    }

    pub async fn embed_text(&self, text: &str) -> Embedded {
        let text = text.to_string();
        let result = self
            .run(move |service| service.embed_text(&text))
            .await
            .and_then(|v| self.check(v));
        self.settle("text", result)
    }

    /// Embed texts in `batch_size` groups; a failed group falls back to
    /// per-text calls so one bad input does not zero its neighbours.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Embedded> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());

        for group in texts.chunks(self.batch_size) {
            let owned = group.to_vec();
            let expected = owned.len();
            let result: Result<Vec<Vec<f32>>, EmbeddingError> = self
                .run(move |service| service.embed_batch(&owned))
                .await
                .and_then(|vectors| {
                    if vectors.len() != expected {
                        return Err(EmbeddingError::GenerationError(format!(
                            "Embedding count mismatch: expected {}, got {}",
                            expected,
                            vectors.len()
                        )));
                    }
                    vectors.into_iter().map(|v| self.check(v)).collect()
                });

            match result {
                Ok(vectors) => out.extend(vectors.into_iter().map(|vector| Embedded {
                    vector,
                    degraded: false,
                })),
                Err(e) => {
                    warn!("Batch embedding failed, retrying items one by one: {}", e);
                    for text in group {
                        out.push(self.embed_text(text).await);
                    }
                }
            }
        }

        debug!(
            "Embedded {} texts in {}ms",
            texts.len(),
            start.elapsed().as_millis()
        );
        out
    }

    async fn run<T, F>(&self, call: F) -> Result<T, EmbeddingError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn EmbeddingService) -> Result<T, EmbeddingError> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let task = tokio::task::spawn_blocking(move || call(service.as_ref()));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(EmbeddingError::GenerationError(join_error.to_string())),
            Err(_) => Err(EmbeddingError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn check(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn settle(&self, what: &str, result: Result<Vec<f32>, EmbeddingError>) -> Embedded {
        match result {
            Ok(vector) => Embedded {
                vector,
                degraded: false,
            },
            Err(e) => {
                warn!("Embedding {} failed, using zero vector: {}", what, e);
                Embedded {
                    vector: vec![0.0; self.dimension],
                    degraded: true,
                }
            }
        }
    }
}
