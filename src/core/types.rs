//! Shared data model for the retrieval/synthesis core (spec §3).
//!
//! These types are the vocabulary C1–C13 pass between each other. They are
//! independent of any particular transport (MCP, HTTP, CLI) and independent
//! of the SQLite-backed persistence layer in `crate::db` — a `Document`/
//! `Chunk` here is the in-memory shape the indices and orchestrator operate
//! on, built from rows read out of `Db`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single ingested document. Immutable once created; content is the
/// single source of truth chunks are derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<String>,
    pub license: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// A bounded passage extracted from a `Document` by the chunker (C2).
/// `id` is `"{parent_id}#{ordinal}"`; ordinals are dense starting at 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub parent_id: String,
    pub ordinal: usize,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

/// Unit-norm dense embedding bound 1:1 to a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

/// A metadata filter: conjunction of equals / any-of predicates, applied
/// identically by C4 (after scoring) and C5 (at the index layer).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// field -> must equal exactly this value
    #[serde(default)]
    pub equals: HashMap<String, String>,
    /// field -> value must be one of this set
    #[serde(default)]
    pub any_of: HashMap<String, Vec<String>>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.any_of.is_empty()
    }

    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        for (field, expected) in &self.equals {
            match metadata.get(field) {
                Some(v) if v == expected => {}
                _ => return false,
            }
        }
        for (field, options) in &self.any_of {
            match metadata.get(field) {
                Some(v) if options.iter().any(|o| o == v) => {}
                _ => return false,
            }
        }
        true
    }
}

/// A scored retrieval hit from a single branch (BM25 or vector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

/// A chunk plus per-request scoring annotations (spec glossary: "Passage").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_id: String,
    pub content: String,
    pub title: Option<String>,
    pub source: String,
    pub url: Option<String>,
    pub fused_score: f32,
    pub lexical_score: Option<f32>,
    pub semantic_score: Option<f32>,
    pub rerank_score: Option<f32>,
}

/// An inbound query, request-scoped.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub max_results: usize,
    pub filter: MetadataFilter,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub forced_variant: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            max_results: 4,
            filter: MetadataFilter::default(),
            temperature: None,
            max_tokens: None,
            forced_variant: None,
            user_id: None,
            session_id: None,
        }
    }
}

/// Per-metric RAGAS evaluation of an `Answer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub answer_id: String,
    pub context_relevancy: f64,
    pub answer_faithfulness: f64,
    pub answer_relevancy: f64,
    pub context_recall: f64,
    pub overall: f64,
    pub eval_ms: f64,
}

/// Final status of an `Answer`, exposed across the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    Completed,
    Degraded,
    Failed,
}

/// The structured response returned by the Synthesis Orchestrator (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub query_id: String,
    pub answer_text: String,
    pub passages: Vec<RetrievedPassage>,
    pub confidence: f32,
    pub latency_ms: f64,
    pub tokens_used: u32,
    pub cost_usd: f64,
    pub variant: String,
    pub status: AnswerStatus,
    pub cache_hit: bool,
    pub error_message: Option<String>,
    pub evaluation: Option<Evaluation>,
}

impl Answer {
    /// The fixed "no relevant information" answer for an empty retrieval set
    /// (spec §4.11 step 5).
    pub fn no_relevant_information(query_id: String, variant: String) -> Self {
        Self {
            query_id,
            answer_text: "I couldn't find relevant information to answer this question."
                .to_string(),
            passages: Vec::new(),
            confidence: 0.0,
            latency_ms: 0.0,
            tokens_used: 0,
            cost_usd: 0.0,
            variant,
            status: AnswerStatus::Completed,
            cache_hit: false,
            error_message: None,
            evaluation: None,
        }
    }

    /// Collapse to a failed answer at the orchestrator boundary (spec §4.11, §7).
    pub fn failed(query_id: String, variant: String, error_message: String) -> Self {
        Self {
            query_id,
            answer_text: String::new(),
            passages: Vec::new(),
            confidence: 0.0,
            latency_ms: 0.0,
            tokens_used: 0,
            cost_usd: 0.0,
            variant,
            status: AnswerStatus::Failed,
            cache_hit: false,
            error_message: Some(error_message),
            evaluation: None,
        }
    }
}

/// A stable variant assignment for a (identifier, experiment) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub experiment_id: String,
    pub identifier: String,
    pub variant: String,
}

/// One retrieval/synthesis configuration selectable by the experiment router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Baseline,
    Reranked,
    Hybrid,
    Finetuned,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Baseline => "baseline",
            Variant::Reranked => "reranked",
            Variant::Hybrid => "hybrid",
            Variant::Finetuned => "finetuned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "baseline" => Some(Variant::Baseline),
            "reranked" => Some(Variant::Reranked),
            "hybrid" => Some(Variant::Hybrid),
            "finetuned" => Some(Variant::Finetuned),
            _ => None,
        }
    }

    pub fn uses_reranker(&self) -> bool {
        matches!(self, Variant::Reranked | Variant::Hybrid | Variant::Finetuned)
    }

    pub fn uses_bm25(&self) -> bool {
        matches!(self, Variant::Hybrid | Variant::Finetuned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_filter_empty_matches_everything() {
        let filter = MetadataFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&HashMap::new()));
    }

    #[test]
    fn metadata_filter_equals_and_any_of_are_conjunctive() {
        let mut equals = HashMap::new();
        equals.insert("namespace".to_string(), "guides".to_string());
        let mut any_of = HashMap::new();
        any_of.insert(
            "agent".to_string(),
            vec!["alpha".to_string(), "beta".to_string()],
        );
        let filter = MetadataFilter { equals, any_of };

        let mut metadata = HashMap::new();
        metadata.insert("namespace".to_string(), "guides".to_string());
        metadata.insert("agent".to_string(), "beta".to_string());
        assert!(filter.matches(&metadata));

        metadata.insert("agent".to_string(), "gamma".to_string());
        assert!(!filter.matches(&metadata));
    }

    #[test]
    fn variant_round_trips_through_str() {
        for v in [
            Variant::Baseline,
            Variant::Reranked,
            Variant::Hybrid,
            Variant::Finetuned,
        ] {
            assert_eq!(Variant::parse(v.as_str()), Some(v));
        }
        assert_eq!(Variant::parse("unknown"), None);
    }

    #[test]
    fn no_relevant_information_answer_has_zero_confidence() {
        let answer = Answer::no_relevant_information("q1".to_string(), "baseline".to_string());
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.passages.is_empty());
        assert_eq!(answer.status, AnswerStatus::Completed);
    }
}
