//! C6: fan-out to C4+C5, fusion, truncation (spec §4.6).
//!
//! Grounded on the teacher's `search::hybrid::search_hybrid` for the
//! concurrent-fan-out shape (`tokio::join!`) and the RRF accumulation loop
//! itself. REDESIGN: the teacher's hybrid search then renormalizes RRF scores
//! with an ad hoc min-max pass and an "adaptive threshold" — that
//! post-processing is dropped here because it would corrupt the exact fused
//! scores the spec's testable properties (§8) pin down; raw RRF output is
//! returned.

use std::collections::HashMap;

use crate::core::bm25_index::Bm25Index;
use crate::core::types::{MetadataFilter, ScoredChunk};
use crate::core::vector_index::VectorIndex;

#[derive(Debug, Clone, Copy)]
pub enum FusionMethod {
    /// Reciprocal Rank Fusion, spec default.
    Rrf { rrf_k: f32 },
    /// Normalized-weighted fusion.
    Weighted { w_bm25: f32, w_vec: f32 },
}

/// A fused hit carrying the original per-branch scores (0 if absent from
/// that branch), as required by spec §4.6.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk_id: String,
    pub fused_score: f32,
    pub lexical_score: Option<f32>,
    pub semantic_score: Option<f32>,
}

/// Fan out to the BM25 and vector branches concurrently, fuse, and truncate
/// to `final_k`. `query_vector` is `None` for the `baseline` variant, which
/// contributes no lexical branch contribution (semantic only).
pub async fn retrieve(
    bm25: &Bm25Index,
    vector: &VectorIndex,
    query_text: &str,
    query_vector: &[f32],
    k_bm25: usize,
    k_vec: usize,
    final_k: usize,
    filter: Option<&MetadataFilter>,
    method: FusionMethod,
    use_bm25: bool,
) -> Vec<FusedHit> {
    let (lexical, semantic) = if use_bm25 {
        tokio::join!(
            bm25.search(query_text, k_bm25, filter),
            vector.search(query_vector, k_vec, filter)
        )
    } else {
        let semantic = vector.search(query_vector, k_vec, filter).await;
        (Vec::new(), semantic)
    };

    let mut fused = match method {
        FusionMethod::Rrf { rrf_k } => reciprocal_rank_fusion(&lexical, &semantic, rrf_k),
        FusionMethod::Weighted { w_bm25, w_vec } => {
            weighted_fusion(&lexical, &semantic, w_bm25, w_vec)
        }
    };

    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused.truncate(final_k);
    fused
}

/// `fused(d) = Σ_{branch b where d appears at rank r_b} 1 / (rrf_k + r_b + 1)`,
/// rank 0-based. Per-passage lexical/semantic scores are preserved unfused.
pub fn reciprocal_rank_fusion(
    lexical: &[ScoredChunk],
    semantic: &[ScoredChunk],
    rrf_k: f32,
) -> Vec<FusedHit> {
    let mut fused_scores: HashMap<String, f32> = HashMap::new();
    let mut lexical_scores: HashMap<String, f32> = HashMap::new();
    let mut semantic_scores: HashMap<String, f32> = HashMap::new();

    for (rank, hit) in lexical.iter().enumerate() {
        *fused_scores.entry(hit.chunk_id.clone()).or_insert(0.0) += 1.0 / (rrf_k + rank as f32 + 1.0);
        lexical_scores.insert(hit.chunk_id.clone(), hit.score);
    }
    for (rank, hit) in semantic.iter().enumerate() {
        *fused_scores.entry(hit.chunk_id.clone()).or_insert(0.0) += 1.0 / (rrf_k + rank as f32 + 1.0);
        semantic_scores.insert(hit.chunk_id.clone(), hit.score);
    }

    fused_scores
        .into_iter()
        .map(|(chunk_id, fused_score)| FusedHit {
            lexical_score: lexical_scores.get(&chunk_id).copied(),
            semantic_score: semantic_scores.get(&chunk_id).copied(),
            chunk_id,
            fused_score,
        })
        .collect()
}

/// Normalize each branch's scores by its own maximum to `[0,1]`, then combine
/// as `w_bm25·n_bm25 + w_vec·n_vec`. Stored (raw) scores are still returned
/// alongside via `lexical_score`/`semantic_score`.
pub fn weighted_fusion(
    lexical: &[ScoredChunk],
    semantic: &[ScoredChunk],
    w_bm25: f32,
    w_vec: f32,
) -> Vec<FusedHit> {
    let lexical_max = lexical.iter().map(|h| h.score).fold(0.0f32, f32::max);
    let semantic_max = semantic.iter().map(|h| h.score).fold(0.0f32, f32::max);

    let mut lexical_raw: HashMap<String, f32> = HashMap::new();
    let mut semantic_raw: HashMap<String, f32> = HashMap::new();
    let mut fused_scores: HashMap<String, f32> = HashMap::new();

    for hit in lexical {
        lexical_raw.insert(hit.chunk_id.clone(), hit.score);
        let normalized = if lexical_max > 0.0 {
            hit.score / lexical_max
        } else {
            0.0
        };
        *fused_scores.entry(hit.chunk_id.clone()).or_insert(0.0) += w_bm25 * normalized;
    }
    for hit in semantic {
        semantic_raw.insert(hit.chunk_id.clone(), hit.score);
        let normalized = if semantic_max > 0.0 {
            hit.score / semantic_max
        } else {
            0.0
        };
        *fused_scores.entry(hit.chunk_id.clone()).or_insert(0.0) += w_vec * normalized;
    }

    fused_scores
        .into_iter()
        .map(|(chunk_id, fused_score)| FusedHit {
            lexical_score: lexical_raw.get(&chunk_id).copied(),
            semantic_score: semantic_raw.get(&chunk_id).copied(),
            chunk_id,
            fused_score,
        })
        .collect()
}
