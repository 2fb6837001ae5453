//! Stored evidence entries and their metadata
//!
//! Metadata has a closed schema for the keys the pipeline reads (role, turn,
//! timestamp, domain, authority and the chunk linkage fields) plus an open
//! `extra` map so callers can attach anything else without a schema change.

mod chunker;

pub use chunker::{ChunkDraft, Chunker, ChunkerConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Exact key/value equality filter applied while collecting candidates
pub type MetadataFilter = BTreeMap<String, Value>;

/// Metadata keys with a fixed meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    Role,
    Turn,
    Timestamp,
    Domain,
    Authority,
    ParentId,
    ChunkIndex,
    TotalChunks,
    IsChunk,
}

impl MetadataKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKey::Role => "role",
            MetadataKey::Turn => "turn",
            MetadataKey::Timestamp => "timestamp",
            MetadataKey::Domain => "domain",
            MetadataKey::Authority => "authority",
            MetadataKey::ParentId => "parent_id",
            MetadataKey::ChunkIndex => "chunk_index",
            MetadataKey::TotalChunks => "total_chunks",
            MetadataKey::IsChunk => "is_chunk",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "role" => Some(MetadataKey::Role),
            "turn" => Some(MetadataKey::Turn),
            "timestamp" => Some(MetadataKey::Timestamp),
            "domain" => Some(MetadataKey::Domain),
            "authority" => Some(MetadataKey::Authority),
            "parent_id" => Some(MetadataKey::ParentId),
            "chunk_index" => Some(MetadataKey::ChunkIndex),
            "total_chunks" => Some(MetadataKey::TotalChunks),
            "is_chunk" => Some(MetadataKey::IsChunk),
            _ => None,
        }
    }
}

/// Metadata attached to a stored entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Debate role of the speaker (proponent, opponent, researcher, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Debate turn number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,

    /// When the evidence was produced; drives the recency feature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Source category (government, news, ...); falls back to role for authority scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_chunk: bool,

    /// Open extension map
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_turn(mut self, turn: u32) -> Self {
        self.turn = Some(turn);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up a key as a JSON value, schema keys first
    pub fn get(&self, key: &str) -> Option<Value> {
        let Some(known) = MetadataKey::parse(key) else {
            return self.extra.get(key).cloned();
        };

        match known {
            MetadataKey::Role => self.role.clone().map(Value::from),
            MetadataKey::Turn => self.turn.map(Value::from),
            MetadataKey::Timestamp => self.timestamp.map(|t| Value::from(t.to_rfc3339())),
            MetadataKey::Domain => self.domain.clone().map(Value::from),
            MetadataKey::Authority => self.authority.clone().map(Value::from),
            MetadataKey::ParentId => self.parent_id.clone().map(Value::from),
            MetadataKey::ChunkIndex => self.chunk_index.map(Value::from),
            MetadataKey::TotalChunks => self.total_chunks.map(Value::from),
            MetadataKey::IsChunk => Some(Value::from(self.is_chunk)),
        }
    }

    /// True when every filter key is present with an equal value
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.get(key).as_ref() == Some(expected))
    }

    /// Lowercased role, if any
    pub fn role_normalized(&self) -> Option<String> {
        self.role.as_ref().map(|r| r.trim().to_lowercase())
    }
}

/// A stored evidence entry
///
/// Entries are never mutated in place; replacing one means delete + insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn is_chunk(&self) -> bool {
        self.metadata.is_chunk
    }
}
