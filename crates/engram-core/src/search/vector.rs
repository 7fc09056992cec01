//! Dense Search Index
//!
//! HNSW approximate-nearest-neighbour index over insight embeddings,
//! keyed by insight id. Rebuilt from the database at startup; incremental
//! updates keep it in sync with inserts.

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// Vector search error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorSearchError {
    #[error("index creation failed: {0}")]
    IndexCreation(String),
    #[error("failed to add vector: {0}")]
    IndexAdd(String),
    #[error("search failed: {0}")]
    IndexSearch(String),
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

/// Configuration for the HNSW index.
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    /// HNSW connectivity (higher = better recall, more memory).
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl VectorIndexConfig {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
        }
    }
}

/// HNSW index with string-keyed entries.
pub struct VectorIndex {
    index: Index,
    config: VectorIndexConfig,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorIndex {
    pub fn new(config: VectorIndexConfig) -> Result<Self, VectorSearchError> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };

        let index =
            Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;

        Ok(Self {
            index,
            config,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    fn reserve(&self, capacity: usize) -> Result<(), VectorSearchError> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorSearchError::IndexCreation(format!("reserve failed: {}", e)))
    }

    /// Add or replace a vector under a string key.
    pub fn add(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.config.dimensions,
                got: vector.len(),
            });
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index
                .remove(existing_id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        // usearch requires capacity to be reserved ahead of add
        let capacity = self.index.capacity();
        if self.index.size() >= capacity {
            self.reserve(std::cmp::max(capacity * 2, 16))?;
        }

        let id = self.next_id;
        self.next_id += 1;

        self.index
            .add(id, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;

        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    /// Remove a vector by key; returns whether it existed.
    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        match self.key_to_id.remove(key) {
            Some(id) => {
                self.id_to_key.remove(&id);
                self.index
                    .remove(id)
                    .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Nearest neighbours as (key, cosine similarity), best first.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.config.dimensions,
                got: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        let results = self
            .index
            .search(query, limit)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        let mut hits = Vec::with_capacity(results.keys.len());
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(string_key) = self.id_to_key.get(key) {
                // Cosine distance → similarity
                hits.push((string_key.clone(), 1.0 - distance));
            }
        }
        Ok(hits)
    }

    /// Nearest neighbours at or above a similarity floor.
    pub fn search_with_threshold(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(String, f32)>, VectorSearchError> {
        let hits = self.search(query, limit)?;
        Ok(hits
            .into_iter()
            .filter(|(_, score)| *score >= min_similarity)
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: usize = 32;

    fn test_vector(seed: f32) -> Vec<f32> {
        (0..DIMS)
            .map(|i| ((i as f32 + seed) / DIMS as f32).sin())
            .collect()
    }

    fn new_index() -> VectorIndex {
        VectorIndex::new(VectorIndexConfig::with_dimensions(DIMS)).unwrap()
    }

    #[test]
    fn test_empty_index() {
        let index = new_index();
        assert!(index.is_empty());
        assert_eq!(index.dimensions(), DIMS);
        assert_eq!(index.search(&test_vector(1.0), 5).unwrap().len(), 0);
    }

    #[test]
    fn test_add_and_search_finds_nearest() {
        let mut index = new_index();
        index.add("insight-1", &test_vector(1.0)).unwrap();
        index.add("insight-2", &test_vector(2.0)).unwrap();
        index.add("insight-3", &test_vector(50.0)).unwrap();

        let hits = index.search(&test_vector(1.0), 3).unwrap();
        assert_eq!(hits[0].0, "insight-1");
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn test_replace_existing_key() {
        let mut index = new_index();
        index.add("insight-1", &test_vector(1.0)).unwrap();
        index.add("insight-1", &test_vector(9.0)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut index = new_index();
        index.add("insight-1", &test_vector(1.0)).unwrap();
        assert!(index.remove("insight-1").unwrap());
        assert!(!index.contains("insight-1"));
        assert!(!index.remove("insight-1").unwrap());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = new_index();
        let result = index.add("insight-1", &[1.0, 2.0]);
        assert!(matches!(
            result,
            Err(VectorSearchError::InvalidDimensions { expected: 32, got: 2 })
        ));
    }

    #[test]
    fn test_threshold_filters() {
        let mut index = new_index();
        index.add("near", &test_vector(1.0)).unwrap();
        index.add("far", &test_vector(500.0)).unwrap();

        let hits = index
            .search_with_threshold(&test_vector(1.0), 10, 0.95)
            .unwrap();
        assert!(hits.iter().any(|(k, _)| k == "near"));
        assert!(hits.iter().all(|(_, s)| *s >= 0.95));
    }
}
