//! C5: cosine-similarity ANN-style index over passage embeddings (spec §4.5).
//!
//! Grounded on the teacher's `search::vector` (`cosine_similarity`, the
//! little-endian `Vec<f32>` blob codec) and `cache::chunk_embedding_cache`
//! (the in-memory `HashMap<String, Vec<f32>>` scan pattern), generalized so
//! the index itself applies the metadata filter rather than relying on a
//! follow-up SQL `WHERE` clause, and so distance is converted to similarity
//! via `1 - d/2` per spec.md's resolved Open Question.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::types::{Embedding, MetadataFilter, ScoredChunk};

struct IndexedVector {
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
}

struct VectorState {
    dim: usize,
    vectors: HashMap<String, IndexedVector>,
}

/// Flat in-memory cosine index. The vector index exclusively owns embedding
/// storage (spec §3 ownership note); the retriever only reads from it.
pub struct VectorIndex {
    state: RwLock<VectorState>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            state: RwLock::new(VectorState {
                dim,
                vectors: HashMap::new(),
            }),
        }
    }

    pub async fn dim(&self) -> usize {
        self.state.read().await.dim
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.vectors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert embeddings, tagged with the metadata of their owning chunk so
    /// the filter can be applied at the index layer. Re-adding a chunk id
    /// replaces its prior vector.
    pub async fn add(&self, embeddings: &[Embedding], metadata: &HashMap<String, HashMap<String, String>>) {
        let mut state = self.state.write().await;
        for embedding in embeddings {
            state.vectors.insert(
                embedding.chunk_id.clone(),
                IndexedVector {
                    vector: embedding.vector.clone(),
                    metadata: metadata.get(&embedding.chunk_id).cloned().unwrap_or_default(),
                },
            );
        }
    }

    pub async fn delete(&self, ids: &[String]) {
        let mut state = self.state.write().await;
        for id in ids {
            state.vectors.remove(id);
        }
    }

    /// Drop every indexed vector, keeping `dim` (spec §6 `Ingest(..., reset=true)`).
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.vectors.clear();
    }

    /// Cosine search. The metadata filter is applied before scoring (an AND
    /// of equals/any-of predicates, matching C4's semantics) rather than as a
    /// post-hoc pass over already-scored results.
    pub async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<ScoredChunk> {
        let state = self.state.read().await;
        let mut hits: Vec<ScoredChunk> = state
            .vectors
            .iter()
            .filter(|(_, v)| filter.map(|f| f.matches(&v.metadata)).unwrap_or(true))
            .map(|(chunk_id, v)| ScoredChunk {
                chunk_id: chunk_id.clone(),
                score: cosine_similarity(query_vector, &v.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);
        hits
    }
}

/// Cosine similarity between two equal-length vectors, `[-1, 1]`. Zero
/// magnitude on either side yields `0.0` rather than `NaN`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "vectors must have equal length");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Convert a cosine distance to a similarity in `[0,1]`, clamped.
/// Resolved per spec.md's Open Question: `sim = 1 - d/2`.
pub fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Little-endian `f32` blob codec, matching the teacher's SQLite blob layout.
pub fn encode_embedding_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_embedding_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
