//! C7: cross-encoder (query, passage) scoring (spec §4.7).
//!
//! Grounded on the *interface* shape of `original_source/src/retrieval/reranker.py`'s
//! `Reranker.rerank`: score every pair, sort descending, slice to `top_k`, and
//! fall back to the input order on failure. No cross-encoder inference crate
//! exists in this corpus, so `CrossEncoder` is a capability interface (spec
//! §9) with a lexical-overlap heuristic as the built-in implementation,
//! standing in for a real trained model.

use async_trait::async_trait;
use std::sync::Arc;

use crate::core::types::RetrievedPassage;

/// Maps a raw cross-encoder score in roughly `[-10, 10]` to `(0, 1)`.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// A capability interface over cross-encoder-style (query, document) scoring,
/// used both by the re-ranker (C7) and, as a fallback, by the evaluator
/// (C13)'s context-relevancy / answer-relevancy metrics.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Raw score for a single (query, document) pair, roughly in `[-10, 10]`.
    async fn score(&self, query: &str, document: &str) -> crate::error::Result<f32>;
}

/// Lets a context struct share one cross-encoder between the re-ranker and
/// the evaluator, which otherwise each take their scorer by value.
#[async_trait]
impl<T: CrossEncoder + ?Sized> CrossEncoder for Arc<T> {
    async fn score(&self, query: &str, document: &str) -> crate::error::Result<f32> {
        (**self).score(query, document).await
    }
}

/// Lexical-overlap cross-encoder stand-in: scores a pair by the fraction of
/// query tokens present in the document, rescaled into the cross-encoder's
/// raw-score range so downstream sigmoid normalization behaves sensibly.
pub struct LexicalOverlapScorer;

#[async_trait]
impl CrossEncoder for LexicalOverlapScorer {
    async fn score(&self, query: &str, document: &str) -> crate::error::Result<f32> {
        let query_terms = crate::core::tokenizer::tokenize(query);
        if query_terms.is_empty() {
            return Ok(0.0);
        }
        let doc_terms: std::collections::HashSet<String> =
            crate::core::tokenizer::tokenize(document).into_iter().collect();
        let covered = query_terms.iter().filter(|t| doc_terms.contains(*t)).count();
        let overlap = covered as f32 / query_terms.len() as f32;
        // Rescale [0,1] overlap to roughly [-6, 6] so sigmoid produces a
        // meaningfully spread-out score rather than clustering near 0.5.
        Ok((overlap - 0.5) * 12.0)
    }
}

/// Rerank `passages` for `query`, returning at most `top_k` reordered by
/// rerank score descending. On cross-encoder failure the input order (sliced
/// to `top_k`) is returned unchanged.
pub async fn rerank(
    cross_encoder: &dyn CrossEncoder,
    query: &str,
    mut passages: Vec<RetrievedPassage>,
    top_k: usize,
) -> Vec<RetrievedPassage> {
    if passages.is_empty() {
        return passages;
    }

    let mut scored = Vec::with_capacity(passages.len());
    for passage in &passages {
        match cross_encoder.score(query, &passage.content).await {
            Ok(raw) => scored.push(Some(sigmoid(raw))),
            Err(_) => {
                passages.truncate(top_k.min(passages.len()));
                return passages;
            }
        }
    }

    for (passage, score) in passages.iter_mut().zip(scored.into_iter()) {
        passage.rerank_score = score;
    }
    passages.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    passages.truncate(top_k.min(passages.len()));
    passages
}
