//! Configuration management for evidra
//!
//! Configuration is loaded from TOML, overlaid with an optional named profile
//! and `EVIDRA_SECTION__KEY` environment overrides, then validated as a whole.
//! Every section has defaults so a partial file is valid.

use crate::embedding::Bm25Params;
use crate::error::{EvidraError, Result};
use crate::memory::ChunkerConfig;
use crate::retrieval::FusionConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Schema version understood by this build
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub lexical: Bm25Params,
    pub fusion: FusionConfig,
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub chunking: ChunkerConfig,
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model name reported in stats ("hashing" for the built-in embedder)
    pub model: String,
    /// Fixed vector dimension `D` of the store
    pub dimension: usize,
    /// Upper bound on a single embedding call before degrading to a zero vector
    pub timeout_ms: u64,
    /// Number of texts sent per `embed_batch` call
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "hashing".to_string(),
            dimension: 384,
            timeout_ms: 5_000,
            batch_size: 32,
        }
    }
}

/// HNSW vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Number of connections per layer (hnsw_rs caps this at 256)
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Capacity hint for the graph
    pub max_elements: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            max_elements: 100_000,
        }
    }
}

/// Query-time retrieval knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Base value fed to the adaptive threshold
    pub similarity_threshold: f64,
    /// Candidate pools are collected at `oversample_factor * top_k`
    pub oversample_factor: usize,
    /// When false the lexical pool is never collected
    pub hybrid_enabled: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            similarity_threshold: 0.50,
            oversample_factor: 2,
            hybrid_enabled: true,
        }
    }
}

/// Learning-to-rank reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    /// JSON model artifact, see [`crate::retrieval::RerankModel`]
    pub model_path: Option<PathBuf>,
    pub vector_weight: f64,
    pub rerank_weight: f64,
    pub confidence_threshold: f64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_path: None,
            vector_weight: 0.7,
            rerank_weight: 0.3,
            confidence_threshold: 0.25,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_fusion: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EvidraError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| EvidraError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| EvidraError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| EvidraError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        if let Some(threshold) = overrides.similarity_threshold {
            self.retrieval.similarity_threshold = threshold;
        }
        if let Some(enabled) = overrides.rerank_enabled {
            self.rerank.enabled = enabled;
        }
        if let Some(adaptive) = overrides.adaptive_fusion {
            self.fusion.adaptive = adaptive;
        }
        tracing::debug!("Applied configuration profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: EVIDRA_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `EVIDRA_`-prefixed key/value overrides from any source
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("EVIDRA_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_value(path, value)?,
            "RETRIEVAL__SIMILARITY_THRESHOLD" => {
                self.retrieval.similarity_threshold = parse_value(path, value)?
            }
            "RETRIEVAL__HYBRID_ENABLED" => self.retrieval.hybrid_enabled = parse_value(path, value)?,
            "FUSION__DEFAULT_ALPHA" => self.fusion.default_alpha = parse_value(path, value)?,
            "FUSION__ADAPTIVE" => self.fusion.adaptive = parse_value(path, value)?,
            "RERANK__ENABLED" => self.rerank.enabled = parse_value(path, value)?,
            "RERANK__MODEL_PATH" => self.rerank.model_path = Some(PathBuf::from(value)),
            "EMBEDDING__TIMEOUT_MS" => self.embedding.timeout_ms = parse_value(path, value)?,
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| EvidraError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("evidra").join("config.toml"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| EvidraError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            lexical: Bm25Params::default(),
            fusion: FusionConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            chunking: ChunkerConfig::default(),
            profiles: HashMap::new(),
        }
    }
}
