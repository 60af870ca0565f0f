//! C4: in-memory Okapi BM25 inverted index (spec §4.4).
//!
//! Grounded on the *shape* of the teacher's `search::bm25` module (a
//! `SearchResult`-like scored hit, namespace/agent metadata filtering,
//! 1-indexed/0-indexed rank handling) but the scoring itself is a from-scratch
//! posting-list structure rather than a delegation to SQLite FTS5's `bm25()` —
//! the teacher's `sanitize_fts5_query` + `bm25(chunks_fts)` approach can't
//! produce the exact, configurable-k1/b formula this spec's testable
//! properties (§8) pin down.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::tokenizer::tokenize;
use crate::core::types::{Chunk, MetadataFilter, ScoredChunk};

#[derive(Debug, Clone)]
struct IndexedChunk {
    term_freqs: HashMap<String, u32>,
    length: usize,
    metadata: HashMap<String, String>,
}

/// Configurable Okapi BM25 scoring parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

struct Bm25State {
    /// term -> chunk_id -> term frequency
    postings: HashMap<String, HashMap<String, u32>>,
    chunks: HashMap<String, IndexedChunk>,
    total_length: u64,
}

impl Bm25State {
    fn new() -> Self {
        Self {
            postings: HashMap::new(),
            chunks: HashMap::new(),
            total_length: 0,
        }
    }

    fn avgdl(&self) -> f32 {
        if self.chunks.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.chunks.len() as f32
        }
    }
}

/// An in-memory inverted index over chunk text, owned exclusively by this
/// structure (spec §3 "BM25 index exclusively owns the tokenized-corpus
/// arrays"). Readers may run concurrently; `add`/`delete` take the write lock.
pub struct Bm25Index {
    state: RwLock<Bm25State>,
    params: Bm25Params,
}

impl Bm25Index {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            state: RwLock::new(Bm25State::new()),
            params,
        }
    }

    /// Tokenize and insert chunks into the posting lists. Re-adding a chunk
    /// id replaces its prior entry.
    pub async fn add(&self, chunks: &[Chunk]) {
        let mut state = self.state.write().await;
        for chunk in chunks {
            if let Some(previous) = state.chunks.remove(&chunk.id) {
                state.total_length -= previous.length as u64;
                for term in previous.term_freqs.keys() {
                    if let Some(posting) = state.postings.get_mut(term) {
                        posting.remove(&chunk.id);
                        if posting.is_empty() {
                            state.postings.remove(term);
                        }
                    }
                }
            }

            let tokens = tokenize(&chunk.text);
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_freqs.keys() {
                state
                    .postings
                    .entry(term.clone())
                    .or_default()
                    .insert(chunk.id.clone(), *term_freqs.get(term).unwrap());
            }
            state.total_length += tokens.len() as u64;
            state.chunks.insert(
                chunk.id.clone(),
                IndexedChunk {
                    term_freqs,
                    length: tokens.len(),
                    metadata: chunk.metadata.clone(),
                },
            );
        }
    }

    /// Remove chunks by id, evicting them from every posting list they
    /// appear in.
    pub async fn delete(&self, ids: &[String]) {
        let mut state = self.state.write().await;
        for id in ids {
            if let Some(removed) = state.chunks.remove(id) {
                state.total_length -= removed.length as u64;
                for term in removed.term_freqs.keys() {
                    if let Some(posting) = state.postings.get_mut(term) {
                        posting.remove(id);
                        if posting.is_empty() {
                            state.postings.remove(term);
                        }
                    }
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop the entire index (spec §6 `Ingest(..., reset=true)`).
    pub async fn clear(&self) {
        *self.state.write().await = Bm25State::new();
    }

    /// Standard Okapi BM25 search. Results are sorted score-descending with a
    /// stable tie-break on chunk id; zero-score hits are omitted.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<ScoredChunk> {
        let state = self.state.read().await;
        if state.chunks.is_empty() {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let n = state.chunks.len() as f32;
        let avgdl = state.avgdl();
        let k1 = self.params.k1;
        let b = self.params.b;

        // IDF is per-term and independent of the candidate chunk, so compute
        // it once per distinct query term.
        let mut idf_by_term: HashMap<&str, f32> = HashMap::new();
        let mut unique_terms: Vec<&str> = Vec::new();
        for term in &query_terms {
            if idf_by_term.contains_key(term.as_str()) {
                continue;
            }
            let df = state
                .postings
                .get(term.as_str())
                .map(|p| p.len())
                .unwrap_or(0) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            idf_by_term.insert(term.as_str(), idf);
            unique_terms.push(term.as_str());
        }

        let mut scores: HashMap<String, f32> = HashMap::new();
        for term in &unique_terms {
            let Some(posting) = state.postings.get(*term) else {
                continue;
            };
            let idf = idf_by_term[term];
            for (chunk_id, &f) in posting.iter() {
                let indexed = &state.chunks[chunk_id];
                let denom = f as f32 + k1 * (1.0 - b + b * indexed.length as f32 / avgdl.max(1e-9));
                let term_score = idf * (f as f32 * (k1 + 1.0)) / denom;
                *scores.entry(chunk_id.clone()).or_insert(0.0) += term_score;
            }
        }

        let mut hits: Vec<ScoredChunk> = scores
            .into_iter()
            .filter(|(id, score)| {
                *score > 0.0
                    && filter
                        .map(|f| state.chunks.get(id).map(|c| f.matches(&c.metadata)).unwrap_or(false))
                        .unwrap_or(true)
            })
            .map(|(chunk_id, score)| ScoredChunk { chunk_id, score })
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            parent_id: "doc1".to_string(),
            ordinal: 0,
            text: text.to_string(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn search_with_no_matching_tokens_is_empty() {
        let index = Bm25Index::new(Bm25Params::default());
        index
            .add(&[chunk("c1", "hybrid search combines lexical and semantic retrieval")])
            .await;
        let hits = index.search("xylophone", 10, None).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn matching_query_returns_strictly_positive_scores() {
        let index = Bm25Index::new(Bm25Params::default());
        index
            .add(&[
                chunk("c1", "BM25 is a lexical ranking function used in search engines"),
                chunk("c2", "vector search uses dense embeddings for semantic retrieval"),
            ])
            .await;
        let hits = index.search("BM25 lexical", 10, None).await;
        assert!(!hits.is_empty());
        for hit in &hits {
            assert!(hit.score > 0.0);
        }
    }

    #[tokio::test]
    async fn results_sorted_descending_with_stable_tie_break() {
        let index = Bm25Index::new(Bm25Params::default());
        index
            .add(&[
                chunk("c2", "rag rag rag"),
                chunk("c1", "rag rag rag"),
                chunk("c3", "rag"),
            ])
            .await;
        let hits = index.search("rag", 10, None).await;
        // c1 and c2 have identical term frequency and length -> identical score,
        // stable tie-break orders them by chunk id.
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[1].chunk_id, "c2");
        assert_eq!(hits[2].chunk_id, "c3");
    }

    #[tokio::test]
    async fn metadata_filter_is_applied_after_scoring() {
        let index = Bm25Index::new(Bm25Params::default());
        let mut meta_a = Map::new();
        meta_a.insert("namespace".to_string(), "guides".to_string());
        let mut meta_b = Map::new();
        meta_b.insert("namespace".to_string(), "research".to_string());
        index
            .add(&[
                Chunk {
                    id: "c1".to_string(),
                    parent_id: "d1".to_string(),
                    ordinal: 0,
                    text: "hybrid retrieval guide".to_string(),
                    metadata: meta_a,
                },
                Chunk {
                    id: "c2".to_string(),
                    parent_id: "d2".to_string(),
                    ordinal: 0,
                    text: "hybrid retrieval research notes".to_string(),
                    metadata: meta_b,
                },
            ])
            .await;

        let mut filter = MetadataFilter::default();
        filter
            .equals
            .insert("namespace".to_string(), "guides".to_string());

        let hits = index.search("hybrid retrieval", 10, Some(&filter)).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[tokio::test]
    async fn delete_removes_chunk_from_future_searches() {
        let index = Bm25Index::new(Bm25Params::default());
        index.add(&[chunk("c1", "fusion of rankings")]).await;
        assert_eq!(index.len().await, 1);
        index.delete(&["c1".to_string()]).await;
        assert_eq!(index.len().await, 0);
        let hits = index.search("fusion", 10, None).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn top_k_truncates_results() {
        let index = Bm25Index::new(Bm25Params::default());
        index
            .add(&[
                chunk("c1", "rag pipeline one"),
                chunk("c2", "rag pipeline two"),
                chunk("c3", "rag pipeline three"),
            ])
            .await;
        let hits = index.search("rag pipeline", 2, None).await;
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn clear_empties_the_index() {
        let index = Bm25Index::new(Bm25Params::default());
        index.add(&[chunk("c1", "rag pipeline")]).await;
        index.clear().await;
        assert!(index.is_empty().await);
        assert!(index.search("rag", 10, None).await.is_empty());
    }
}
