//! The retrieval/synthesis core (spec §9): a `RagCore` context struct
//! explicitly wires together every capability (indices, embedder, LLM
//! client, cross-encoder, cache, experiment router, evaluator) and exposes
//! the five RPC-level operations (spec §6): `query`, `ingest`,
//! `vector_store_status`, `feedback`, `experiment_stats`. No global mutable
//! state; everything lives behind an explicitly constructed `Arc`.

pub mod bm25_index;
pub mod cache;
pub mod chunker;
pub mod embedder;
pub mod evaluator;
pub mod experiment;
pub mod hybrid;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod reranker;
pub mod retry;
pub mod store;
pub mod tokenizer;
pub mod types;
pub mod vector_index;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::core::bm25_index::{Bm25Index, Bm25Params};
use crate::core::cache::Cache;
use crate::core::embedder::{Embedder, OpenAiEmbedder};
use crate::core::evaluator::{self, EvalLlm, EvaluationInputs, ProviderEvalLlm};
use crate::core::experiment::{ExperimentStatsStore, MultiArmedBandit, VariantSummary};
use crate::core::llm::{LlmClient, LlmProvider, OpenAiChatProvider, PriceTable};
use crate::core::orchestrator::{CostCoefficients, Orchestrator, OrchestratorConfig};
use crate::core::reranker::{CrossEncoder, LexicalOverlapScorer};
use crate::core::store::DocumentStore;
use crate::core::types::{Answer, AnswerStatus, Document, Embedding, Query, Variant};
use crate::core::vector_index::VectorIndex;
use crate::error::{RagmcpError, Result};

/// Answer-cache capacity. Not itself a listed configuration key (spec §6
/// only externalizes `cache_ttl_seconds`); chosen generously since cache
/// eviction here is an LRU performance concern, not a correctness one.
const ANSWER_CACHE_CAPACITY: usize = 10_000;
/// Feedback record capacity (spec §6: "key-value entries... TTL of 30 days").
const FEEDBACK_CACHE_CAPACITY: usize = 100_000;
const FEEDBACK_TTL: Duration = Duration::from_secs(30 * 86_400);

/// One document to ingest (spec §6 `Ingest(documents[], reset) →
/// {inserted_count}`).
#[derive(Debug, Clone)]
pub struct IngestDocument {
    pub content: String,
    pub source: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(serde::Serialize)]
pub struct IngestResult {
    pub inserted_count: usize,
}

/// `VectorStoreStatus` health classification (spec §6). The original
/// surface models an external vector-store dependency that can be
/// unreachable; since C4/C5 here are in-process with no network boundary,
/// `Degraded`/`Error` are reachable only if a future swap-in of a remote
/// vector store fails its health probe, not today's in-memory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreHealth {
    Healthy,
    Empty,
    Degraded,
    Error,
}

#[derive(serde::Serialize)]
pub struct VectorStoreStatusReport {
    pub status: StoreHealth,
    pub document_count: usize,
    pub search_working: bool,
}

/// Feedback kind (spec §6 `Feedback(result_id, kind, value, comment?)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Thumbs,
    Rating,
    Correction,
    Implicit,
}

#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    pub result_id: String,
    pub kind: FeedbackKind,
    pub value: f64,
    pub comment: Option<String>,
}

/// `ExperimentStats` response (spec §6).
#[derive(serde::Serialize)]
pub struct ExperimentStatsReport {
    pub per_variant: Vec<VariantSummary>,
    pub winning_variant: Option<String>,
}

/// Knobs for `RagCore` itself, beyond what `OrchestratorConfig` already
/// covers (chunking, evaluation gating, the two cache stores).
pub struct RagCoreConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub baseline_variant: String,
    pub confidence_level: f64,
    pub ragas_enabled: bool,
    pub answer_cache_capacity: usize,
    pub answer_cache_namespace: String,
}

/// The explicitly-constructed context struct spec §9 calls for in place of
/// global singletons: owns every component's storage, generic over the
/// three provider capability interfaces plus the evaluator's narrower LLM
/// interface.
pub struct RagCore<E: Embedder, P: LlmProvider, C: CrossEncoder, EL: EvalLlm> {
    bm25: Arc<Bm25Index>,
    vector: Arc<VectorIndex>,
    store: Arc<DocumentStore>,
    embedder: Arc<E>,
    cross_encoder: Arc<C>,
    eval_llm: Arc<EL>,
    orchestrator: Orchestrator<Arc<E>, P, Arc<C>>,
    stats: ExperimentStatsStore,
    feedback: Cache<FeedbackRecord>,
    chunk_size: usize,
    chunk_overlap: usize,
    baseline_variant: String,
    confidence_level: f64,
    ragas_enabled: bool,
}

impl<E: Embedder, P: LlmProvider, C: CrossEncoder, EL: EvalLlm> RagCore<E, P, C, EL> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bm25: Arc<Bm25Index>,
        vector: Arc<VectorIndex>,
        store: Arc<DocumentStore>,
        embedder: Arc<E>,
        llm: LlmClient<P>,
        cross_encoder: Arc<C>,
        eval_llm: Arc<EL>,
        bandit: Option<Arc<MultiArmedBandit>>,
        orchestrator_config: OrchestratorConfig,
        config: RagCoreConfig,
    ) -> Self {
        let answer_cache = Cache::new(
            config.answer_cache_namespace,
            config.answer_cache_capacity,
            orchestrator_config.cache_ttl,
        );
        let orchestrator = Orchestrator::new(
            bm25.clone(),
            vector.clone(),
            store.clone(),
            embedder.clone(),
            llm,
            cross_encoder.clone(),
            answer_cache,
            bandit,
            orchestrator_config,
        );

        Self {
            bm25,
            vector,
            store,
            embedder,
            cross_encoder,
            eval_llm,
            orchestrator,
            stats: ExperimentStatsStore::new(),
            feedback: Cache::new("feedback", FEEDBACK_CACHE_CAPACITY, FEEDBACK_TTL),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            baseline_variant: config.baseline_variant,
            confidence_level: config.confidence_level,
            ragas_enabled: config.ragas_enabled,
        }
    }

    /// `Query(question, max_results, metadata_filter, variant?) → Answer`
    /// (spec §6). Runs the synthesis orchestrator, then (if RAGAS is
    /// enabled and the answer is fresh and non-failed) the offline
    /// evaluator, then records the outcome for `ExperimentStats`.
    pub async fn query(&self, mut query: Query) -> Answer {
        let request_id = uuid::Uuid::new_v4().to_string();
        query.max_results = query.max_results.clamp(1, 20);
        let query_text = query.text.clone();

        let mut answer = self.orchestrator.answer(query, &request_id).await;

        if self.ragas_enabled && answer.status == AnswerStatus::Completed && answer.evaluation.is_none() {
            let passage_texts: Vec<String> = answer.passages.iter().map(|p| p.content.clone()).collect();
            let inputs = EvaluationInputs {
                query: &query_text,
                answer: &answer.answer_text,
                passages: &passage_texts,
                ground_truth: None,
            };
            let evaluation = evaluator::evaluate(
                self.cross_encoder.as_ref(),
                self.eval_llm.as_ref(),
                inputs,
                answer.query_id.clone(),
            )
            .await;
            answer.evaluation = Some(evaluation);
        }

        self.stats
            .record(
                &answer.variant,
                answer.status != AnswerStatus::Failed,
                answer.latency_ms,
                answer.cost_usd,
                answer.evaluation.as_ref().map(|e| e.overall),
            )
            .await;

        answer
    }

    /// `Ingest(documents[], reset=false) → {inserted_count}` (spec §6).
    /// Chunks each document (C2), indexes it into both C4 and C5, and
    /// hydrates `DocumentStore` for passage lookups. A document whose
    /// embedding call fails is still chunk-indexed into BM25 (spec §7
    /// "Dependency-unavailable... degraded mode: BM25-only retrieval") but
    /// skipped for the vector index and not counted as inserted.
    pub async fn ingest(&self, documents: Vec<IngestDocument>, reset: bool) -> IngestResult {
        if reset {
            self.bm25.clear().await;
            self.vector.clear().await;
            self.store.clear().await;
        }

        let mut inserted_count = 0usize;
        for doc in documents {
            let id = content_hash(&doc.content);
            let document = Document {
                id: id.clone(),
                content: doc.content.clone(),
                source: doc.source,
                title: doc.title,
                url: doc.url,
                published_at: None,
                license: None,
                metadata: doc.metadata.clone(),
            };
            self.store.insert_document(document).await;

            let chunks = crate::core::chunker::chunk(
                &doc.content,
                &id,
                &doc.metadata,
                self.chunk_size,
                self.chunk_overlap,
            );
            if chunks.is_empty() {
                continue;
            }
            self.store.insert_chunks(chunks.clone()).await;
            self.bm25.add(&chunks).await;

            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            if let Ok(vectors) = self.embedder.embed_batch(&texts).await {
                let embeddings: Vec<Embedding> = chunks
                    .iter()
                    .zip(vectors)
                    .map(|(c, vector)| Embedding { chunk_id: c.id.clone(), vector })
                    .collect();
                let metadata_by_chunk: HashMap<String, HashMap<String, String>> = chunks
                    .iter()
                    .map(|c| (c.id.clone(), c.metadata.clone()))
                    .collect();
                self.vector.add(&embeddings, &metadata_by_chunk).await;
            }

            inserted_count += 1;
        }

        IngestResult { inserted_count }
    }

    /// `VectorStoreStatus() → {status, document_count, search_working}`
    /// (spec §6).
    pub async fn vector_store_status(&self) -> VectorStoreStatusReport {
        let document_count = self.store.document_count().await;
        let status = if document_count == 0 {
            StoreHealth::Empty
        } else {
            StoreHealth::Healthy
        };
        VectorStoreStatusReport {
            status,
            document_count,
            search_working: true,
        }
    }

    /// `Feedback(result_id, kind, value, comment?)` (spec §6). Synchronous:
    /// the feedback cache is a plain `Mutex`-guarded map, not async state.
    pub fn feedback(
        &self,
        result_id: String,
        kind: FeedbackKind,
        value: f64,
        comment: Option<String>,
    ) -> Result<()> {
        if kind == FeedbackKind::Rating && !(1.0..=5.0).contains(&value) {
            return Err(RagmcpError::Validation(
                "rating feedback value must be in 1..=5".to_string(),
            ));
        }
        let key = format!("feedback:{result_id}");
        self.feedback.put(
            key,
            FeedbackRecord { result_id, kind, value, comment },
        );
        Ok(())
    }

    /// `ExperimentStats(experiment_id) → {per_variant[], winning_variant?}`
    /// (spec §6). A single `ExperimentStatsStore` is shared across the
    /// process's one active experiment (spec's `OrchestratorConfig` is
    /// itself single-experiment-scoped); `experiment_id` is accepted for
    /// interface parity with a future multi-experiment deployment.
    pub async fn experiment_stats(&self, _experiment_id: &str) -> ExperimentStatsReport {
        let (per_variant, winning_variant) =
            self.stats.compute(&self.baseline_variant, self.confidence_level).await;
        ExperimentStatsReport { per_variant, winning_variant }
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The default, fully-wired `RagCore` a deployment gets from `Config`:
/// OpenAI-compatible embedder and chat provider, lexical-overlap
/// cross-encoder, and an evaluator LLM sharing the same provider type as
/// the synthesis path.
pub type DefaultRagCore =
    RagCore<OpenAiEmbedder, OpenAiChatProvider, LexicalOverlapScorer, ProviderEvalLlm<OpenAiChatProvider>>;

/// Build the default `RagCore` from a loaded `Config` (spec §9: "a factory
/// returns one of the built-in variants").
pub fn build(config: &Config) -> Result<DefaultRagCore> {
    let embedding_api_key = std::env::var(&config.embeddings.api_key_env)
        .map_err(|_| RagmcpError::Config(format!("{} not set", config.embeddings.api_key_env)))?;
    let llm_api_key = std::env::var(&config.llm.api_key_env)
        .map_err(|_| RagmcpError::Config(format!("{} not set", config.llm.api_key_env)))?;

    let bm25 = Arc::new(Bm25Index::new(Bm25Params {
        k1: config.retrieval.bm25_k1,
        b: config.retrieval.bm25_b,
    }));
    let vector = Arc::new(VectorIndex::new(config.embeddings.dimensions));
    let store = Arc::new(DocumentStore::new());

    let embedder = Arc::new(OpenAiEmbedder::new(
        embedding_api_key,
        config.embeddings.model.clone(),
        config.embeddings.dimensions,
        config.embeddings.batch_size,
    ));

    let answer_provider = OpenAiChatProvider::new(llm_api_key.clone(), config.llm.model.clone());
    let llm_client = LlmClient::new(answer_provider, PriceTable::uniform(config.llm.cost_per_llm_token));

    let eval_provider = OpenAiChatProvider::new(llm_api_key, config.llm.model.clone());
    let eval_llm = Arc::new(ProviderEvalLlm::new(LlmClient::new(
        eval_provider,
        PriceTable::uniform(config.llm.cost_per_llm_token),
    )));

    let cross_encoder = Arc::new(LexicalOverlapScorer);

    let bandit = Arc::new(MultiArmedBandit::new(
        config.experiments.variants.clone(),
        &config.experiments.split,
        config.experiments.bandit_epsilon,
    ));

    let orchestrator_config = OrchestratorConfig {
        search_top_k: config.retrieval.search_top_k,
        final_top_k: config.retrieval.final_top_k,
        rrf_k: config.retrieval.rrf_k,
        reranker_top_k: config.reranker.top_k,
        max_context_length: config.llm.max_context_length,
        llm_temperature: config.llm.temperature,
        llm_max_tokens: config.llm.max_tokens,
        llm_top_p: 1.0,
        cache_ttl: Duration::from_secs(config.cache.ttl_seconds),
        experiment_id: "default".to_string(),
        variants: config.experiments.variants.clone(),
        split: config.experiments.split.clone(),
        costs: CostCoefficients {
            cost_per_embedding: config.llm.cost_per_embedding,
            cost_per_vec_search: config.llm.cost_per_vec_search,
            cost_per_rerank: config.llm.cost_per_rerank,
            cost_per_llm_token: config.llm.cost_per_llm_token,
        },
    };

    let ragcore_config = RagCoreConfig {
        chunk_size: config.performance.chunk_size_tokens,
        chunk_overlap: config.performance.chunk_overlap_tokens,
        baseline_variant: Variant::Baseline.as_str().to_string(),
        confidence_level: config.experiments.confidence,
        ragas_enabled: config.ragas.enabled,
        answer_cache_capacity: ANSWER_CACHE_CAPACITY,
        answer_cache_namespace: config.cache.namespace.clone(),
    };

    Ok(RagCore::new(
        bm25,
        vector,
        store,
        embedder,
        llm_client,
        cross_encoder,
        eval_llm,
        Some(bandit),
        orchestrator_config,
        ragcore_config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::ChatMessage;

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
            Ok(("Hybrid search combines BM25 and vector retrieval.".to_string(), 30))
        }
        fn model_name(&self) -> &str {
            "stub-model"
        }
    }

    fn test_core() -> RagCore<StubEmbedder, StubProvider, LexicalOverlapScorer, ProviderEvalLlm<StubProvider>> {
        let bm25 = Arc::new(Bm25Index::new(Bm25Params::default()));
        let vector = Arc::new(VectorIndex::new(2));
        let store = Arc::new(DocumentStore::new());
        let embedder = Arc::new(StubEmbedder);
        let llm = LlmClient::new(StubProvider, PriceTable::uniform(0.000002));
        let cross_encoder = Arc::new(LexicalOverlapScorer);
        let eval_llm = Arc::new(ProviderEvalLlm::new(LlmClient::new(
            StubProvider,
            PriceTable::uniform(0.000002),
        )));

        let orchestrator_config = OrchestratorConfig {
            search_top_k: 20,
            final_top_k: 4,
            rrf_k: 60.0,
            reranker_top_k: 4,
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
        };
        let ragcore_config = RagCoreConfig {
            chunk_size: 200,
            chunk_overlap: 20,
            baseline_variant: "baseline".to_string(),
            confidence_level: 0.95,
            ragas_enabled: false,
            answer_cache_capacity: 100,
            answer_cache_namespace: "test".to_string(),
        };

        RagCore::new(
            bm25,
            vector,
            store,
            embedder,
            llm,
            cross_encoder,
            eval_llm,
            None,
            orchestrator_config,
            ragcore_config,
        )
    }

    #[tokio::test]
    async fn ingest_indexes_into_both_branches_and_hydrates_the_store() {
        let core = test_core();
        let result = core
            .ingest(
                vec![IngestDocument {
                    content: "Hybrid search combines BM25 and vector retrieval.".to_string(),
                    source: "guides".to_string(),
                    title: Some("Hybrid Search".to_string()),
                    url: None,
                    metadata: HashMap::new(),
                }],
                false,
            )
            .await;
        assert_eq!(result.inserted_count, 1);

        let status = core.vector_store_status().await;
        assert_eq!(status.status, StoreHealth::Healthy);
        assert_eq!(status.document_count, 1);
    }

    #[tokio::test]
    async fn ingest_with_reset_clears_prior_state() {
        let core = test_core();
        core.ingest(
            vec![IngestDocument {
                content: "first document content".to_string(),
                source: "guides".to_string(),
                title: None,
                url: None,
                metadata: HashMap::new(),
            }],
            false,
        )
        .await;
        core.ingest(Vec::new(), true).await;
        let status = core.vector_store_status().await;
        assert_eq!(status.status, StoreHealth::Empty);
        assert_eq!(status.document_count, 0);
    }

    #[tokio::test]
    async fn query_end_to_end_after_ingest() {
        let core = test_core();
        core.ingest(
            vec![IngestDocument {
                content: "Hybrid search combines BM25 and vector retrieval.".to_string(),
                source: "guides".to_string(),
                title: None,
                url: None,
                metadata: HashMap::new(),
            }],
            false,
        )
        .await;

        let answer = core.query(Query::new("what is hybrid search?")).await;
        assert_eq!(answer.status, AnswerStatus::Completed);
        assert!(!answer.passages.is_empty());
    }

    #[tokio::test]
    async fn empty_corpus_query_returns_no_relevant_information() {
        let core = test_core();
        let answer = core.query(Query::new("anything")).await;
        assert_eq!(answer.status, AnswerStatus::Completed);
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.passages.is_empty());
    }

    #[test]
    fn feedback_rejects_out_of_range_rating() {
        let core = test_core();
        let result = core.feedback("q1".to_string(), FeedbackKind::Rating, 6.0, None);
        assert!(result.is_err());
    }

    #[test]
    fn feedback_accepts_thumbs_with_any_value() {
        let core = test_core();
        let result = core.feedback("q1".to_string(), FeedbackKind::Thumbs, 1.0, Some("great".to_string()));
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn experiment_stats_reflects_recorded_queries() {
        let core = test_core();
        core.ingest(
            vec![IngestDocument {
                content: "Hybrid search combines BM25 and vector retrieval.".to_string(),
                source: "guides".to_string(),
                title: None,
                url: None,
                metadata: HashMap::new(),
            }],
            false,
        )
        .await;
        core.query(Query::new("what is hybrid search?")).await;

        let report = core.experiment_stats("default").await;
        assert_eq!(report.per_variant.len(), 1);
        assert_eq!(report.per_variant[0].variant, "baseline");
        assert_eq!(report.per_variant[0].sample_size, 1);
    }
}
