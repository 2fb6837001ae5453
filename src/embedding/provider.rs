/// Embedding service trait and built-in implementations
use super::Tokenizer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding timed out after {0}ms")]
    Timeout(u64),
}

/// Embedding backend consumed by the retrieval engine
///
/// Implementations are synchronous; the engine runs them on the blocking
/// pool under a timeout.
pub trait EmbeddingService: Send + Sync {
    /// Embed a document for storage
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a search query; models with asymmetric prompts override this
    fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_text(query)
    }

    /// Embed several documents, one vector per input in order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }

    /// Fixed output dimension
    fn dimension(&self) -> usize;

    /// Model name reported in stats
    fn model_name(&self) -> &str;
}

/// Deterministic feature-hashing embedder
///
/// Each token is hashed with BLAKE3 into a signed bucket, then the vector is
/// L2-normalized. Needs no model download and gives identical vectors across
/// runs, so it backs offline deployments and tests. Texts without tokens map
/// to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    tokenizer: Tokenizer,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            tokenizer: Tokenizer::new(),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&bytes[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingService for HashingEmbedder {
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in self.tokenizer.tokenize(text) {
            let (index, sign) = self.bucket(&token);
            vector[index] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}

#[cfg(feature = "fastembed")]
pub use self::local::FastEmbedService;

#[cfg(feature = "fastembed")]
mod local {
    use super::{EmbeddingError, EmbeddingService};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Arc;

    /// FastEmbed ONNX models run locally
    ///
    /// Models are downloaded to `~/.cache/huggingface/` on first use.
    pub struct FastEmbedService {
        model: Arc<TextEmbedding>,
        model_name: String,
        dimension: usize,
    }

    impl FastEmbedService {
        pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
            let (embedding_model, dimension) = match model_name {
                "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
                _ => {
                    return Err(EmbeddingError::InitializationError(format!(
                        "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                        model_name
                    )));
                }
            };

            tracing::info!(
                "Initializing embedding model: {} ({}D)",
                model_name,
                dimension
            );

            let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
            let model = TextEmbedding::try_new(init_options)
                .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

            Ok(Self {
                model: Arc::new(model),
                model_name: model_name.to_string(),
                dimension,
            })
        }

        fn check(&self, embedding: &[f32]) -> Result<(), EmbeddingError> {
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
            Ok(())
        }
    }

    impl EmbeddingService for FastEmbedService {
        fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.is_empty() {
                return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
            }

            let mut embeddings = self
                .model
                .embed(vec![text.to_string()], None)
                .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

            let embedding = embeddings.pop().ok_or_else(|| {
                EmbeddingError::GenerationError("No embeddings generated".to_string())
            })?;
            self.check(&embedding)?;
            Ok(embedding)
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            if texts.iter().any(|t| t.is_empty()) {
                return Err(EmbeddingError::InvalidInput(
                    "Batch contains empty text".to_string(),
                ));
            }

            let embeddings = self
                .model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

            for embedding in &embeddings {
                self.check(embedding)?;
            }
            Ok(embeddings)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }

}
