/// HNSW vector index with an id -> entry side table
///
/// hnsw_rs has no true removal, so deleting an entry only drops its row from
/// the side table and leaves a tombstone in the graph. Readers resolve every
/// graph hit through their own table snapshot and skip anything missing,
/// which covers tombstones and points inserted after the snapshot was taken.
/// Once tombstones outnumber live rows the graph is rebuilt from the table.
use crate::memory::{MemoryEntry, MetadataFilter};
use ahash::{HashMap, HashMapExt};
use hnsw_rs::prelude::*;
use std::sync::Arc;
use thiserror::Error;

/// Upper bound on HNSW layers accepted by hnsw_rs
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Entry not found: {0}")]
    NotFound(String),
}

/// HNSW construction and search parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_elements: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 100_000,
        }
    }
}

/// Live vector candidate resolved through the side table
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub entry: Arc<MemoryEntry>,
    /// L2 distance from the query
    pub distance: f32,
}

impl VectorHit {
    /// `1 / (1 + distance)`
    pub fn similarity(&self) -> f64 {
        1.0 / (1.0 + self.distance as f64)
    }
}

#[derive(Debug, Clone, Default)]
struct VectorTable {
    rows: HashMap<usize, Arc<MemoryEntry>>,
    internal_ids: HashMap<String, usize>,
}

type Graph = Hnsw<'static, f32, DistL2>;

fn new_graph(params: &HnswParams) -> Graph {
    Hnsw::<f32, DistL2>::new(
        params.m,
        params.max_elements,
        MAX_LAYERS,
        params.ef_construction,
        DistL2,
    )
}

/// Mutable vector index; see [`VectorSnapshot`] for the read side
pub struct VectorIndex {
    graph: Arc<Graph>,
    table: Arc<VectorTable>,
    dimension: usize,
    params: HnswParams,
    /// Next internal graph id; also the number of points ever inserted
    next_internal: usize,
}

impl VectorIndex {
    /// Create a new vector index
    ///
    /// # Arguments
    /// * `dimension` - Vector dimension (must match embedding dimension)
    /// * `params` - HNSW parameters
    pub fn new(dimension: usize, params: HnswParams) -> Result<Self, VectorIndexError> {
        if dimension == 0 {
            return Err(VectorIndexError::InitializationError(
                "dimension must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            graph: Arc::new(new_graph(&params)),
            table: Arc::new(VectorTable::default()),
            dimension,
            params,
            next_internal: 0,
        })
    }

    /// Insert an entry, tombstoning any previous entry with the same id
    pub fn insert(&mut self, entry: MemoryEntry) -> Result<(), VectorIndexError> {
        if entry.embedding.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: entry.embedding.len(),
            });
        }

        let internal = self.next_internal;
        self.next_internal += 1;
        self.graph.insert((&entry.embedding, internal));

        let table = Arc::make_mut(&mut self.table);
        if let Some(old) = table.internal_ids.insert(entry.id.clone(), internal) {
            table.rows.remove(&old);
        }
        table.rows.insert(internal, Arc::new(entry));

        self.compact_if_sparse();
        Ok(())
    }

    /// Drop the entry's row; its graph point becomes a tombstone
    pub fn remove(&mut self, id: &str) -> Result<Arc<MemoryEntry>, VectorIndexError> {
        if !self.table.internal_ids.contains_key(id) {
            return Err(VectorIndexError::NotFound(id.to_string()));
        }

        let table = Arc::make_mut(&mut self.table);
        let internal = table
            .internal_ids
            .remove(id)
            .ok_or_else(|| VectorIndexError::NotFound(id.to_string()))?;
        let removed = table
            .rows
            .remove(&internal)
            .ok_or_else(|| VectorIndexError::NotFound(id.to_string()))?;

        self.compact_if_sparse();
        Ok(removed)
    }

    /// Rebuild the graph from live rows only, renumbering internal ids
    ///
    /// Snapshots taken earlier keep the old graph and table.
    pub fn compact(&mut self) {
        let mut live: Vec<Arc<MemoryEntry>> = self.table.rows.values().cloned().collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));

        let graph = new_graph(&self.params);
        let mut table = VectorTable::default();
        for (internal, entry) in live.into_iter().enumerate() {
            graph.insert((&entry.embedding, internal));
            table.internal_ids.insert(entry.id.clone(), internal);
            table.rows.insert(internal, entry);
        }

        let dropped = self.tombstones();
        self.next_internal = table.rows.len();
        self.graph = Arc::new(graph);
        self.table = Arc::new(table);
        tracing::debug!("Compacted vector graph, dropped {} tombstones", dropped);
    }

    fn compact_if_sparse(&mut self) {
        if self.tombstones() > self.len() {
            self.compact();
        }
    }

    /// Replace the graph and table with empty ones
    pub fn clear(&mut self) {
        self.graph = Arc::new(new_graph(&self.params));
        self.table = Arc::new(VectorTable::default());
        self.next_internal = 0;
    }

    pub fn get(&self, id: &str) -> Option<Arc<MemoryEntry>> {
        let internal = self.table.internal_ids.get(id)?;
        self.table.rows.get(internal).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.internal_ids.contains_key(id)
    }

    /// Ids of live entries whose metadata names `parent_id` as parent
    pub fn children_of(&self, parent_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table
            .rows
            .values()
            .filter(|e| e.metadata.parent_id.as_deref() == Some(parent_id))
            .map(|e| e.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }

    /// Graph points that no longer have a row
    pub fn tombstones(&self) -> usize {
        self.next_internal - self.table.rows.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Immutable view for lock-free searching
    pub fn snapshot(&self) -> VectorSnapshot {
        VectorSnapshot {
            graph: Arc::clone(&self.graph),
            table: Arc::clone(&self.table),
            dimension: self.dimension,
            ef_search: self.params.ef_search,
            graph_points: self.next_internal,
        }
    }
}

/// Read-only view of the vector index at one point in time
#[derive(Clone)]
pub struct VectorSnapshot {
    graph: Arc<Graph>,
    table: Arc<VectorTable>,
    dimension: usize,
    ef_search: usize,
    graph_points: usize,
}

impl VectorSnapshot {
    /// k nearest live neighbors as `(id, distance)`, closest first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, VectorIndexError> {
        Ok(self
            .collect(query, k, None)?
            .into_iter()
            .map(|hit| (hit.entry.id.clone(), hit.distance))
            .collect())
    }

    /// Collect up to `want` live hits matching `filter`
    ///
    /// The graph fetch starts at `want` and doubles until enough rows survive
    /// the tombstone and metadata checks or the whole graph has been visited.
    pub fn collect(
        &self,
        query: &[f32],
        want: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if want == 0 || self.table.rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut fetch = want.min(self.graph_points);
        loop {
            let neighbours = self.graph.search(query, fetch, self.ef_search.max(fetch));

            let mut hits: Vec<VectorHit> = neighbours
                .into_iter()
                .filter_map(|n| {
                    let entry = self.table.rows.get(&n.d_id)?;
                    if let Some(filter) = filter {
                        if !entry.metadata.matches(filter) {
                            return None;
                        }
                    }
                    Some(VectorHit {
                        entry: Arc::clone(entry),
                        distance: n.distance,
                    })
                })
                .collect();

            if hits.len() >= want || fetch >= self.graph_points {
                hits.sort_by(|a, b| {
                    a.distance
                        .partial_cmp(&b.distance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.entry.id.cmp(&b.entry.id))
                });
                hits.truncate(want);
                return Ok(hits);
            }

            fetch = fetch.saturating_mul(2).min(self.graph_points);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<MemoryEntry>> {
        let internal = self.table.internal_ids.get(id)?;
        self.table.rows.get(internal)
    }

    pub fn len(&self) -> usize {
        self.table.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.rows.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
