//! C11: drives C6 → C7? → C9 → C10, the query-to-answer pipeline (spec §4.11).
//!
//! Grounded on the teacher's top-level `mcp::tools::search` handler for the
//! "look up cache, retrieve, assemble response" shape, generalized into the
//! full ten-step sequence spec.md prescribes, including the bandit outcome
//! emission and the orchestrator's own linear cost formula (distinct from
//! `core::llm::PriceTable`, which prices a single completion call).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::bm25_index::Bm25Index;
use crate::core::cache::{normalize_query, Cache};
use crate::core::embedder::Embedder;
use crate::core::experiment::{assign, resolve_identifier, MultiArmedBandit};
use crate::core::hybrid::{self, FusionMethod};
use crate::core::llm::{ChatMessage, LlmClient, LlmProvider};
use crate::core::prompt;
use crate::core::reranker::{self, CrossEncoder};
use crate::core::store::DocumentStore;
use crate::core::types::{Answer, AnswerStatus, Query, RetrievedPassage, Variant};
use crate::error::{RagmcpError, Result};

/// Flat per-unit cost coefficients (spec §6 `cost_per_*`), used for the
/// orchestrator's own `cost_usd` formula rather than `LlmClient`'s
/// model-keyed `PriceTable`.
#[derive(Debug, Clone, Copy)]
pub struct CostCoefficients {
    pub cost_per_embedding: f64,
    pub cost_per_vec_search: f64,
    pub cost_per_rerank: f64,
    pub cost_per_llm_token: f64,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub search_top_k: usize,
    pub final_top_k: usize,
    pub rrf_k: f32,
    pub reranker_top_k: usize,
    pub max_context_length: usize,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_top_p: f32,
    pub cache_ttl: Duration,
    pub experiment_id: String,
    pub variants: Vec<String>,
    pub split: Vec<f64>,
    pub costs: CostCoefficients,
}

/// Per-query outcome fed back to the experiment router's bandit adapter, if
/// one is attached (spec §4.11 step 10).
struct Outcome {
    variant: String,
    success: bool,
    cost_usd: f64,
}

/// Drives a single query end to end. Generic over the three capability
/// interfaces (spec §9): embedding, chat completion, and cross-encoder
/// scoring.
pub struct Orchestrator<E: Embedder, P: LlmProvider, C: CrossEncoder> {
    bm25: Arc<Bm25Index>,
    vector: Arc<crate::core::vector_index::VectorIndex>,
    store: Arc<DocumentStore>,
    embedder: E,
    llm: LlmClient<P>,
    cross_encoder: C,
    cache: Cache<Answer>,
    bandit: Option<Arc<MultiArmedBandit>>,
    config: OrchestratorConfig,
}

impl<E: Embedder, P: LlmProvider, C: CrossEncoder> Orchestrator<E, P, C> {
    pub fn new(
        bm25: Arc<Bm25Index>,
        vector: Arc<crate::core::vector_index::VectorIndex>,
        store: Arc<DocumentStore>,
        embedder: E,
        llm: LlmClient<P>,
        cross_encoder: C,
        cache: Cache<Answer>,
        bandit: Option<Arc<MultiArmedBandit>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            bm25,
            vector,
            store,
            embedder,
            llm,
            cross_encoder,
            cache,
            bandit,
            config,
        }
    }

    pub async fn answer(&self, query: Query, request_fallback_id: &str) -> Answer {
        let start = Instant::now();
        let query_id = request_fallback_id.to_string();

        match self.try_answer(&query, &query_id, start).await {
            Ok(answer) => answer,
            Err(err) => Answer::failed(query_id, "unknown".to_string(), err.to_string()),
        }
    }

    async fn try_answer(&self, query: &Query, query_id: &str, start: Instant) -> Result<Answer> {
        if query.text.trim().is_empty() {
            return Err(RagmcpError::Validation("question must not be empty".to_string()));
        }

        // Step 1: cache lookup.
        let normalized = normalize_query(&query.text);
        let params_json = format!(
            "{{\"max_results\":{},\"variant\":{:?}}}",
            query.max_results, query.forced_variant
        );
        let cache_key = self.cache.make_key(&normalized, &params_json);
        if let Some(mut cached) = self.cache.get(&cache_key) {
            cached.cache_hit = true;
            return Ok(cached);
        }

        // Step 2: variant assignment.
        let variant_str = match &query.forced_variant {
            Some(v) => v.clone(),
            None => {
                let identifier = resolve_identifier(
                    query.user_id.as_deref(),
                    query.session_id.as_deref(),
                    query_id,
                );
                assign(identifier, &self.config.experiment_id, &self.config.variants, &self.config.split)
            }
        };
        let variant = Variant::parse(&variant_str)
            .ok_or_else(|| RagmcpError::Validation(format!("unknown variant: {variant_str}")))?;

        let result = self.retrieve_and_synthesize(query, variant, start).await;

        let outcome = Outcome {
            variant: variant_str.clone(),
            success: matches!(result, Ok(ref a) if a.status != AnswerStatus::Failed),
            cost_usd: result.as_ref().map(|a| a.cost_usd).unwrap_or(0.0),
        };
        self.emit_outcome(outcome).await;

        let mut answer = result.unwrap_or_else(|err| {
            Answer::failed(query_id.to_string(), variant_str.clone(), err.to_string())
        });

        // Step 9: cache store (failed answers are not cached).
        if answer.status != AnswerStatus::Failed {
            self.cache.put(cache_key, answer.clone());
        }
        answer.query_id = query_id.to_string();
        Ok(answer)
    }

    async fn retrieve_and_synthesize(
        &self,
        query: &Query,
        variant: Variant,
        start: Instant,
    ) -> Result<Answer> {
        let query_embedding = self.embedder.embed(&query.text).await?;

        // Spec §6: `max_results` is a per-request override of the configured
        // final_top_k (clamped to >= 1 by `Query::new`'s `[1,20]` validation
        // at the transport boundary).
        let final_k = query.max_results.max(1);
        let (k_vec, final_k_for_retrieval, method) = match variant {
            Variant::Baseline => (final_k, final_k, FusionMethod::Rrf { rrf_k: self.config.rrf_k }),
            Variant::Reranked => (3 * final_k, 3 * final_k, FusionMethod::Rrf { rrf_k: self.config.rrf_k }),
            Variant::Hybrid | Variant::Finetuned => (
                self.config.search_top_k,
                3 * final_k,
                FusionMethod::Rrf { rrf_k: self.config.rrf_k },
            ),
        };

        let fused = hybrid::retrieve(
            &self.bm25,
            &self.vector,
            &query.text,
            &query_embedding,
            self.config.search_top_k,
            k_vec,
            final_k_for_retrieval,
            if query.filter.is_empty() { None } else { Some(&query.filter) },
            method,
            variant.uses_bm25(),
        )
        .await;

        // Step 5: empty retrieval short-circuits.
        if fused.is_empty() {
            let mut answer = Answer::no_relevant_information(String::new(), variant.as_str().to_string());
            answer.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            return Ok(answer);
        }

        let confidence = {
            let top3: Vec<f32> = fused.iter().take(3).map(|h| h.fused_score).collect();
            let mean = top3.iter().sum::<f32>() / top3.len() as f32;
            mean.clamp(0.0, 1.0)
        };

        let mut passages = Vec::with_capacity(fused.len());
        for hit in &fused {
            let Some((content, title, source, url)) = self.store.passage_fields(&hit.chunk_id).await else {
                continue;
            };
            passages.push(RetrievedPassage {
                chunk_id: hit.chunk_id.clone(),
                content,
                title,
                source,
                url,
                fused_score: hit.fused_score,
                lexical_score: hit.lexical_score,
                semantic_score: hit.semantic_score,
                rerank_score: None,
            });
        }
        let retrieved_count = passages.len();

        // Step 4: optional re-ranking.
        let reranked = variant.uses_reranker();
        if reranked {
            passages = reranker::rerank(&self.cross_encoder, &query.text, passages, self.config.reranker_top_k).await;
        }

        // Step 6: prompt assembly then LLM completion.
        let messages = prompt::assemble(&query.text, &passages, self.config.max_context_length);
        let chat_messages = vec![
            ChatMessage { role: "system".to_string(), content: messages.system },
            ChatMessage { role: "user".to_string(), content: messages.user },
        ];
        let completion = self
            .llm
            .complete(
                &chat_messages,
                query.temperature.unwrap_or(self.config.llm_temperature),
                query.max_tokens.unwrap_or(self.config.llm_max_tokens),
                self.config.llm_top_p,
            )
            .await?;

        // Step 8: orchestrator's own linear cost formula.
        let costs = &self.config.costs;
        let cost_usd = costs.cost_per_embedding
            + costs.cost_per_vec_search * retrieved_count as f64
            + if reranked { costs.cost_per_rerank * retrieved_count as f64 } else { 0.0 }
            + costs.cost_per_llm_token * completion.tokens_used as f64;

        Ok(Answer {
            query_id: String::new(),
            answer_text: completion.text,
            passages,
            confidence,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            tokens_used: completion.tokens_used,
            cost_usd,
            variant: variant.as_str().to_string(),
            status: AnswerStatus::Completed,
            cache_hit: false,
            error_message: None,
            evaluation: None,
        })
    }

    async fn emit_outcome(&self, outcome: Outcome) {
        if let Some(bandit) = &self.bandit {
            let success_rate = if outcome.success { 1.0 } else { 0.0 };
            bandit.update_arm(&outcome.variant, success_rate, outcome.cost_usd).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::PriceTable;
    use crate::core::reranker::LexicalOverlapScorer;
    use crate::core::types::{Chunk, Document, Embedding};
    use crate::core::vector_index::VectorIndex;
    use std::collections::HashMap;

    struct StubEmbedder;
    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dim(&self) -> usize {
            2
        }
    }

    struct StubProvider;
    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        async fn complete_once(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
            _top_p: f32,
        ) -> Result<(String, u32)> {
            Ok(("Hybrid search combines lexical and semantic retrieval.".to_string(), 42))
        }
        fn model_name(&self) -> &str {
            "stub-model"
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            search_top_k: 20,
            final_top_k: 3,
            rrf_k: 60.0,
            reranker_top_k: 3,
            max_context_length: 2048,
            llm_temperature: 0.7,
            llm_max_tokens: 512,
            llm_top_p: 1.0,
            cache_ttl: Duration::from_secs(3600),
            experiment_id: "default".to_string(),
            variants: vec!["baseline".to_string()],
            split: vec![1.0],
            costs: CostCoefficients {
                cost_per_embedding: 0.0001,
                cost_per_vec_search: 0.00001,
                cost_per_rerank: 0.00005,
                cost_per_llm_token: 0.000002,
            },
        }
    }

    async fn build_orchestrator() -> Orchestrator<StubEmbedder, StubProvider, LexicalOverlapScorer> {
        let bm25 = Arc::new(Bm25Index::new(Default::default()));
        let vector = Arc::new(VectorIndex::new(2));
        let store = Arc::new(DocumentStore::new());

        store
            .insert_document(Document {
                id: "doc1".to_string(),
                content: "full content".to_string(),
                source: "guides".to_string(),
                title: Some("Hybrid Search".to_string()),
                url: None,
                published_at: None,
                license: None,
                metadata: HashMap::new(),
            })
            .await;
        let chunk = Chunk {
            id: "doc1#0".to_string(),
            parent_id: "doc1".to_string(),
            ordinal: 0,
            text: "Hybrid search combines BM25 and vector retrieval.".to_string(),
            metadata: HashMap::new(),
        };
        store.insert_chunks(vec![chunk.clone()]).await;
        bm25.add(&[chunk]).await;
        vector
            .add(
                &[Embedding { chunk_id: "doc1#0".to_string(), vector: vec![1.0, 0.0] }],
                &HashMap::new(),
            )
            .await;

        let llm = LlmClient::new(StubProvider, PriceTable::uniform(0.000002));
        Orchestrator::new(
            bm25,
            vector,
            store,
            StubEmbedder,
            llm,
            LexicalOverlapScorer,
            Cache::new("test", 100, Duration::from_secs(3600)),
            None,
            config(),
        )
    }

    #[tokio::test]
    async fn end_to_end_answer_completes_for_known_corpus() {
        let orchestrator = build_orchestrator().await;
        let mut query = Query::new("What is hybrid search?");
        query.forced_variant = Some("baseline".to_string());
        let answer = orchestrator.answer(query, "req-1").await;
        assert_eq!(answer.status, AnswerStatus::Completed);
        assert!(!answer.passages.is_empty());
        assert!(answer.confidence > 0.0);
        assert!(answer.cost_usd > 0.0);
        assert!(!answer.cache_hit);
    }

    #[tokio::test]
    async fn second_identical_query_is_served_from_cache() {
        let orchestrator = build_orchestrator().await;
        let mut query = Query::new("What is hybrid search?");
        query.forced_variant = Some("baseline".to_string());
        let _first = orchestrator.answer(query.clone(), "req-1").await;
        let second = orchestrator.answer(query, "req-2").await;
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn empty_question_fails_validation() {
        let orchestrator = build_orchestrator().await;
        let query = Query::new("   ");
        let answer = orchestrator.answer(query, "req-1").await;
        assert_eq!(answer.status, AnswerStatus::Failed);
        assert!(answer.error_message.is_some());
    }

    #[tokio::test]
    async fn unknown_forced_variant_fails_with_validation_message() {
        let orchestrator = build_orchestrator().await;
        let mut query = Query::new("what is bm25");
        query.forced_variant = Some("not-a-variant".to_string());
        let answer = orchestrator.answer(query, "req-1").await;
        assert_eq!(answer.status, AnswerStatus::Failed);
    }

    #[tokio::test]
    async fn empty_corpus_yields_no_relevant_information_answer() {
        let bm25 = Arc::new(Bm25Index::new(Default::default()));
        let vector = Arc::new(VectorIndex::new(2));
        let store = Arc::new(DocumentStore::new());
        let llm = LlmClient::new(StubProvider, PriceTable::uniform(0.000002));
        let orchestrator = Orchestrator::new(
            bm25,
            vector,
            store,
            StubEmbedder,
            llm,
            LexicalOverlapScorer,
            Cache::new("test", 100, Duration::from_secs(3600)),
            None,
            config(),
        );
        let mut query = Query::new("anything");
        query.forced_variant = Some("baseline".to_string());
        let answer = orchestrator.answer(query, "req-1").await;
        assert_eq!(answer.status, AnswerStatus::Completed);
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.passages.is_empty());
    }
}
