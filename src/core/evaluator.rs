//! C13: offline RAGAS-style evaluation (spec §4.13).
//!
//! Grounded on `original_source/src/evaluation/ragas_evaluator.py` for the
//! four-metric shape, the default-on-exception pattern, and the `[0,1]`
//! clamping; on the teacher's `eval::metrics` module for *test style* only
//! (small scoring functions, `#[cfg(test)]` with literal expected values) —
//! the teacher's own metrics (precision@k/recall@k/MRR) are IR-retrieval
//! metrics, not RAGAS, and have no counterpart here. The four metrics run
//! concurrently via `futures::future::join_all`, matching spec §5's "the
//! evaluator fans out four metric sub-tasks."

use futures::future::join_all;

use crate::core::llm::{ChatMessage, LlmClient, LlmProvider};
use crate::core::reranker::{sigmoid, CrossEncoder};
use crate::core::tokenizer::tokenize;
use crate::core::types::Evaluation;

/// Default score substituted for a metric whose computation fails (spec
/// §4.13: "an exception in any metric produces the default 0.7").
pub const METRIC_DEFAULT: f64 = 0.7;
/// Answer-faithfulness's own documented default when zero claims are
/// extracted from the answer (spec §4.13).
pub const FAITHFULNESS_NO_CLAIMS_DEFAULT: f64 = 0.75;

/// An LLM capability narrow enough for the evaluator's claim-extraction and
/// claim-verification prompts; kept separate from `LlmProvider` (C10)
/// because the evaluator only ever needs single free-text completions, not
/// the full retry/cost-accounting machinery.
#[async_trait::async_trait]
pub trait EvalLlm: Send + Sync {
    async fn ask(&self, prompt: &str) -> crate::error::Result<String>;
}

/// Adapts a full `LlmClient<P>` (C10) down to the evaluator's narrower
/// single-free-text-completion interface, so a context struct can point the
/// evaluator at the same underlying provider the synthesis path uses without
/// the evaluator depending on C10's retry/cost-accounting machinery directly.
pub struct ProviderEvalLlm<P: LlmProvider> {
    client: LlmClient<P>,
    temperature: f32,
    max_tokens: u32,
}

impl<P: LlmProvider> ProviderEvalLlm<P> {
    /// `temperature=0.0` favors deterministic claim-extraction/verification
    /// judgments over creative completions.
    pub fn new(client: LlmClient<P>) -> Self {
        Self {
            client,
            temperature: 0.0,
            max_tokens: 256,
        }
    }
}

#[async_trait::async_trait]
impl<P: LlmProvider> EvalLlm for ProviderEvalLlm<P> {
    async fn ask(&self, prompt: &str) -> crate::error::Result<String> {
        let messages = [ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        let result = self
            .client
            .complete(&messages, self.temperature, self.max_tokens, 1.0)
            .await?;
        Ok(result.text)
    }
}

pub struct EvaluationInputs<'a> {
    pub query: &'a str,
    pub answer: &'a str,
    pub passages: &'a [String],
    pub ground_truth: Option<&'a str>,
}

/// Compute all four RAGAS metrics concurrently and the weighted overall
/// score. Each metric independently falls back to its documented default on
/// failure; a single metric's failure never prevents the others from being
/// computed.
pub async fn evaluate(
    cross_encoder: &dyn CrossEncoder,
    llm: &dyn EvalLlm,
    inputs: EvaluationInputs<'_>,
    answer_id: String,
) -> Evaluation {
    let start = std::time::Instant::now();

    let (context_relevancy, answer_faithfulness, answer_relevancy, context_recall) = {
        let fut_cr = context_relevancy(cross_encoder, llm, inputs.query, inputs.passages);
        let fut_af = answer_faithfulness(llm, inputs.answer, inputs.passages);
        let fut_ar = answer_relevancy(cross_encoder, llm, inputs.query, inputs.answer);
        let fut_rec = context_recall(llm, inputs.query, inputs.passages, inputs.ground_truth);

        let results = join_all(vec![
            Box::pin(async { Metric::ContextRelevancy(fut_cr.await) }) as std::pin::Pin<Box<dyn std::future::Future<Output = Metric> + Send>>,
            Box::pin(async { Metric::AnswerFaithfulness(fut_af.await) }),
            Box::pin(async { Metric::AnswerRelevancy(fut_ar.await) }),
            Box::pin(async { Metric::ContextRecall(fut_rec.await) }),
        ])
        .await;

        let mut cr = METRIC_DEFAULT;
        let mut af = METRIC_DEFAULT;
        let mut ar = METRIC_DEFAULT;
        let mut rec = METRIC_DEFAULT;
        for metric in results {
            match metric {
                Metric::ContextRelevancy(v) => cr = v,
                Metric::AnswerFaithfulness(v) => af = v,
                Metric::AnswerRelevancy(v) => ar = v,
                Metric::ContextRecall(v) => rec = v,
            }
        }
        (cr, af, ar, rec)
    };

    let overall = overall_score(context_relevancy, answer_faithfulness, answer_relevancy, context_recall);

    Evaluation {
        answer_id,
        context_relevancy,
        answer_faithfulness,
        answer_relevancy,
        context_recall,
        overall,
        eval_ms: start.elapsed().as_secs_f64() * 1000.0,
    }
}

enum Metric {
    ContextRelevancy(f64),
    AnswerFaithfulness(f64),
    AnswerRelevancy(f64),
    ContextRecall(f64),
}

/// `overall = 0.25·CR + 0.30·AF + 0.30·AR + 0.15·REC`, rounded to 3 decimals.
pub fn overall_score(cr: f64, af: f64, ar: f64, rec: f64) -> f64 {
    let raw = 0.25 * cr + 0.30 * af + 0.30 * ar + 0.15 * rec;
    (raw * 1000.0).round() / 1000.0
}

async fn context_relevancy(
    cross_encoder: &dyn CrossEncoder,
    llm: &dyn EvalLlm,
    query: &str,
    passages: &[String],
) -> f64 {
    if passages.is_empty() {
        return 0.0;
    }

    let mut scores = Vec::with_capacity(passages.len());
    let mut cross_encoder_failed = false;
    for passage in passages {
        match cross_encoder.score(query, passage).await {
            Ok(raw) => scores.push(sigmoid(raw) as f64),
            Err(_) => {
                cross_encoder_failed = true;
                break;
            }
        }
    }

    if !cross_encoder_failed {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        return mean.clamp(0.0, 1.0);
    }

    // Fall back to LLM-binary relevance voting.
    let mut prompt = format!(
        "Given the question and retrieved contexts, rate each context as relevant (1) or not \
relevant (0).\n\nQuestion: {query}\n\nContexts:\n"
    );
    for (i, passage) in passages.iter().enumerate() {
        let truncated: String = passage.chars().take(500).collect();
        prompt.push_str(&format!("\n{}. {}", i + 1, truncated));
    }
    prompt.push_str("\n\nProvide relevancy scores as a comma-separated list (e.g. 1,0,1,1,0):");

    match llm.ask(&prompt).await {
        Ok(response) => {
            let votes: Vec<f64> = response
                .split(',')
                .map(|s| s.trim().parse::<f64>().unwrap_or(0.5))
                .collect();
            if votes.is_empty() {
                METRIC_DEFAULT
            } else {
                (votes.iter().sum::<f64>() / votes.len() as f64).clamp(0.0, 1.0)
            }
        }
        Err(_) => METRIC_DEFAULT,
    }
}

async fn answer_faithfulness(llm: &dyn EvalLlm, answer: &str, passages: &[String]) -> f64 {
    if passages.is_empty() || answer.is_empty() {
        return 0.0;
    }

    let claims = match extract_claims(llm, answer).await {
        Ok(claims) => claims,
        Err(_) => return METRIC_DEFAULT,
    };
    if claims.is_empty() {
        return FAITHFULNESS_NO_CLAIMS_DEFAULT;
    }

    let combined: String = passages
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let context: String = combined.chars().take(2000).collect();

    let mut verified = 0usize;
    for claim in &claims {
        let prompt = format!(
            "Context:\n{context}\n\nClaim: {claim}\n\nIs this claim directly supported by the \
context above? Answer yes or no."
        );
        match llm.ask(&prompt).await {
            Ok(response) => {
                if response.to_lowercase().contains("yes") {
                    verified += 1;
                }
            }
            Err(_) => return METRIC_DEFAULT,
        }
    }

    (verified as f64 / claims.len() as f64).clamp(0.0, 1.0)
}

async fn extract_claims(llm: &dyn EvalLlm, answer: &str) -> crate::error::Result<Vec<String>> {
    let prompt = format!(
        "Extract the atomic factual claims in the following answer as a newline-separated list. \
If there are no factual claims, respond with an empty line.\n\nAnswer: {answer}"
    );
    let response = llm.ask(&prompt).await?;
    Ok(response
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect())
}

async fn answer_relevancy(
    cross_encoder: &dyn CrossEncoder,
    llm: &dyn EvalLlm,
    query: &str,
    answer: &str,
) -> f64 {
    if answer.is_empty() {
        return 0.0;
    }

    if let Ok(raw) = cross_encoder.score(query, answer).await {
        return (sigmoid(raw) as f64).clamp(0.0, 1.0);
    }

    // Fall back: generate 3 questions from the answer, average similarity to
    // the original query.
    let prompt = format!(
        "Generate exactly 3 questions that the following answer would address, one per line.\n\nAnswer: {answer}"
    );
    let generated = match llm.ask(&prompt).await {
        Ok(response) => response
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .take(3)
            .map(|l| l.to_string())
            .collect::<Vec<_>>(),
        Err(_) => return METRIC_DEFAULT,
    };
    if generated.is_empty() {
        return METRIC_DEFAULT;
    }

    let mut total = 0.0;
    for question in &generated {
        match cross_encoder.score(query, question).await {
            Ok(raw) => total += sigmoid(raw) as f64,
            Err(_) => return METRIC_DEFAULT,
        }
    }
    (total / generated.len() as f64).clamp(0.0, 1.0)
}

async fn context_recall(
    llm: &dyn EvalLlm,
    query: &str,
    passages: &[String],
    ground_truth: Option<&str>,
) -> f64 {
    if passages.is_empty() {
        return 0.0;
    }

    if let Some(ground_truth) = ground_truth {
        let combined = passages.join("\n");
        let context: String = combined.chars().take(2000).collect();
        let prompt = format!(
            "Ground truth: {ground_truth}\n\nContexts:\n{context}\n\nRate from 0 to 1 what fraction \
of the ground truth's information is present in the contexts. Respond with only the number."
        );
        return match llm.ask(&prompt).await {
            Ok(response) => response
                .split_whitespace()
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(METRIC_DEFAULT),
            Err(_) => METRIC_DEFAULT,
        };
    }

    match extract_aspects(llm, query).await {
        Ok(aspects) if !aspects.is_empty() => {
            let lower_passages: Vec<String> = passages.iter().map(|p| p.to_lowercase()).collect();
            let mentioned = aspects
                .iter()
                .filter(|aspect| {
                    let aspect_lower = aspect.to_lowercase();
                    lower_passages.iter().any(|p| {
                        p.contains(&aspect_lower)
                            || first_three_words(&aspect_lower)
                                .map(|prefix| p.contains(&prefix))
                                .unwrap_or(false)
                    })
                })
                .count();
            (mentioned as f64 / aspects.len() as f64).clamp(0.0, 1.0)
        }
        _ => term_coverage(query, passages),
    }
}

async fn extract_aspects(llm: &dyn EvalLlm, query: &str) -> crate::error::Result<Vec<String>> {
    let prompt = format!(
        "List up to 5 distinct aspects or sub-topics the following question asks about, one per \
line.\n\nQuestion: {query}"
    );
    let response = llm.ask(&prompt).await?;
    Ok(response
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .take(5)
        .map(|l| l.to_string())
        .collect())
}

fn first_three_words(s: &str) -> Option<String> {
    let words: Vec<&str> = s.split_whitespace().take(3).collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Term-coverage fallback used when aspect extraction fails: fraction of
/// query tokens that appear in the union of passage tokens.
fn term_coverage(query: &str, passages: &[String]) -> f64 {
    let query_terms: std::collections::HashSet<String> = tokenize(query).into_iter().collect();
    if query_terms.is_empty() {
        return 0.5;
    }
    let mut covered: std::collections::HashSet<String> = std::collections::HashSet::new();
    for passage in passages {
        let passage_terms: std::collections::HashSet<String> = tokenize(passage).into_iter().collect();
        for term in query_terms.intersection(&passage_terms) {
            covered.insert(term.clone());
        }
    }
    (covered.len() as f64 / query_terms.len() as f64).clamp(0.0, 1.0)
}
