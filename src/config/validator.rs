use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{EvidraError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every failure at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_lexical(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_rerank(config, &mut errors);
        Self::validate_chunking(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EvidraError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_ms",
                "Timeout must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let m = config.indexing.hnsw_m;
        if m == 0 || m > 256 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                format!("HNSW M must be between 1 and 256, got {}", m),
            ));
        }

        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if config.indexing.max_elements == 0 {
            errors.push(ValidationError::new(
                "indexing.max_elements",
                "Max elements must be greater than 0",
            ));
        }
    }

    fn validate_lexical(config: &Config, errors: &mut Vec<ValidationError>) {
        let params = &config.lexical;
        if params.k1 < 0.0 {
            errors.push(ValidationError::new(
                "lexical.k1",
                format!("k1 must be non-negative, got {}", params.k1),
            ));
        }

        if !(0.0..=1.0).contains(&params.b) {
            errors.push(ValidationError::new(
                "lexical.b",
                format!("b must be between 0.0 and 1.0, got {}", params.b),
            ));
        }

        if params.epsilon < 0.0 {
            errors.push(ValidationError::new(
                "lexical.epsilon",
                format!("epsilon must be non-negative, got {}", params.epsilon),
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let alpha = config.fusion.default_alpha;
        if !(0.0..=1.0).contains(&alpha) {
            errors.push(ValidationError::new(
                "fusion.default_alpha",
                format!("Alpha must be between 0.0 and 1.0, got {}", alpha),
            ));
        }

        if config.fusion.rrf_k == 0 {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                "RRF k must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        let threshold = config.retrieval.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "retrieval.similarity_threshold",
                format!("Threshold must be between 0.0 and 1.0, got {}", threshold),
            ));
        }

        if config.retrieval.oversample_factor == 0 {
            errors.push(ValidationError::new(
                "retrieval.oversample_factor",
                "Oversample factor must be at least 1",
            ));
        }
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let rerank = &config.rerank;

        if rerank.vector_weight < 0.0 || rerank.rerank_weight < 0.0 {
            errors.push(ValidationError::new(
                "rerank",
                "Blend weights must be non-negative",
            ));
        } else if rerank.vector_weight + rerank.rerank_weight <= 0.0 {
            errors.push(ValidationError::new(
                "rerank",
                "At least one blend weight must be positive",
            ));
        }

        if !(0.0..=1.0).contains(&rerank.confidence_threshold) {
            errors.push(ValidationError::new(
                "rerank.confidence_threshold",
                format!(
                    "Confidence threshold must be between 0.0 and 1.0, got {}",
                    rerank.confidence_threshold
                ),
            ));
        }

        // A missing model file is a runtime degradation, not a config error
        if rerank.enabled && rerank.model_path.is_none() {
            errors.push(ValidationError::new(
                "rerank.model_path",
                "Reranking is enabled but no model path is set",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if chunking.threshold == 0 {
            errors.push(ValidationError::new(
                "chunking.threshold",
                "Chunk threshold must be greater than 0",
            ));
        }

        if chunking.chunk_size == 0 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                "Chunk size must be greater than 0",
            ));
        } else if chunking.chunk_size > chunking.threshold {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                format!(
                    "Chunk size {} exceeds chunk threshold {}",
                    chunking.chunk_size, chunking.threshold
                ),
            ));
        }
    }
}
