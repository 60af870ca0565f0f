//! C10: remote chat-completion client with retries and cost accounting
//! (spec §4.10).
//!
//! Grounded on the teacher's `embeddings::openai` retry loop (generalized via
//! `core::retry::RetryPolicy`, spec's base-4s/cap-10s/3-attempt policy rather
//! than the teacher's base-1s policy) and on
//! `original_source/src/providers/openai.py::estimate_cost` for the 60/40
//! input/output token cost split and per-model price table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::retry::RetryPolicy;
use crate::error::{RagmcpError, Result};

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// `complete` result: generated text, total tokens, wall-clock latency, and
/// the estimated cost of the call.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: String,
    pub tokens_used: u32,
    pub latency_ms: f64,
    pub cost_usd: f64,
}

/// Per-model `{input, output}` per-token price. Spec §9: externalize values
/// to configuration rather than hard-code them.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, (f64, f64)>,
    default: (f64, f64),
}

impl PriceTable {
    /// Built-in defaults mirror `original_source/src/providers/openai.py::PRICING`
    /// (per-token, not per-1000-tokens).
    pub fn openai_defaults() -> Self {
        let mut prices = HashMap::new();
        prices.insert("gpt-3.5-turbo".to_string(), (0.0005 / 1000.0, 0.0015 / 1000.0));
        prices.insert("gpt-4".to_string(), (0.03 / 1000.0, 0.06 / 1000.0));
        prices.insert("gpt-4-turbo".to_string(), (0.01 / 1000.0, 0.03 / 1000.0));
        Self {
            default: prices["gpt-3.5-turbo"],
            prices,
        }
    }

    /// Build a table with a single uniform per-token price, used when a
    /// deployment only has `Config::llm.cost_per_llm_token` and no
    /// per-model breakdown.
    pub fn uniform(cost_per_token: f64) -> Self {
        Self {
            prices: HashMap::new(),
            default: (cost_per_token, cost_per_token),
        }
    }

    fn price_for(&self, model: &str) -> (f64, f64) {
        self.prices.get(model).copied().unwrap_or(self.default)
    }

    /// 60/40 input/output split when the provider doesn't report the split
    /// separately, rounded to 6 decimals matching the Python original.
    pub fn estimate_cost(&self, model: &str, total_tokens: u32) -> f64 {
        let (input_price, output_price) = self.price_for(model);
        let input_tokens = (total_tokens as f64 * 0.6) as u32;
        let output_tokens = (total_tokens as f64 * 0.4) as u32;
        let cost = input_tokens as f64 * input_price + output_tokens as f64 * output_price;
        (cost * 1e6).round() / 1e6
    }
}

/// Capability interface (spec §9) over a remote chat-completion provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        top_p: f32,
    ) -> Result<(String, u32)>;

    fn model_name(&self) -> &str;
}

/// Stateless wrapper driving retry + cost accounting over any `LlmProvider`.
pub struct LlmClient<P: LlmProvider> {
    provider: P,
    retry_policy: RetryPolicy,
    prices: PriceTable,
}

impl<P: LlmProvider> LlmClient<P> {
    pub fn new(provider: P, prices: PriceTable) -> Self {
        Self {
            provider,
            retry_policy: RetryPolicy::spec_default(),
            prices,
        }
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        top_p: f32,
    ) -> Result<CompletionResult> {
        let start = Instant::now();
        let (text, tokens_used) = self
            .retry_policy
            .run(|| self.provider.complete_once(messages, temperature, max_tokens, top_p))
            .await?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let cost_usd = self.prices.estimate_cost(self.provider.model_name(), tokens_used);

        Ok(CompletionResult {
            text,
            tokens_used,
            latency_ms,
            cost_usd,
        })
    }
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatApiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize)]
struct ChatApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

/// OpenAI-compatible chat-completions provider: the built-in implementation
/// of `LlmProvider` a factory returns by default (spec §9 "a factory returns
/// one of the built-in variants").
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiChatProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
        top_p: f32,
    ) -> Result<(String, u32)> {
        let body = ChatRequestBody {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatApiMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            temperature,
            max_tokens,
            top_p,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagmcpError::Embedding(format!("Network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response".to_string());
            return Err(RagmcpError::Embedding(format!(
                "OpenAI chat API error {status}: {text}"
            )));
        }

        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|e| RagmcpError::Embedding(format!("Failed to parse response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);

        Ok((text.trim().to_string(), tokens))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        model: String,
        text: String,
        tokens: u32,
        fail_times: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn complete_once(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
            _top_p: f32,
        ) -> Result<(String, u32)> {
            use std::sync::atomic::Ordering;
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(RagmcpError::Embedding("429 rate limited".to_string()));
            }
            Ok((self.text.clone(), self.tokens))
        }

        fn model_name(&self) -> &str {
            &self.model
        }
    }

    #[test]
    fn openai_price_table_matches_known_models() {
        let table = PriceTable::openai_defaults();
        // gpt-4 input price is 0.03/1000 per token.
        let cost = table.estimate_cost("gpt-4", 1000);
        // 600 input tokens * 0.00003 + 400 output tokens * 0.00006
        let expected = 600.0 * 0.00003 + 400.0 * 0.00006;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_default_price() {
        let table = PriceTable::openai_defaults();
        let known = table.estimate_cost("gpt-3.5-turbo", 1000);
        let unknown = table.estimate_cost("some-future-model", 1000);
        assert_eq!(known, unknown);
    }

    #[tokio::test]
    async fn complete_returns_text_tokens_and_nonnegative_cost() {
        let provider = StubProvider {
            model: "gpt-3.5-turbo".to_string(),
            text: "hello".to_string(),
            tokens: 100,
            fail_times: std::sync::atomic::AtomicU32::new(0),
        };
        let client = LlmClient::new(provider, PriceTable::openai_defaults());
        let result = client
            .complete(&[ChatMessage { role: "user".to_string(), content: "hi".to_string() }], 0.7, 512, 1.0)
            .await
            .unwrap();
        assert_eq!(result.text, "hello");
        assert_eq!(result.tokens_used, 100);
        assert!(result.cost_usd >= 0.0);
    }

    #[tokio::test]
    async fn complete_retries_on_retryable_error_then_succeeds() {
        let provider = StubProvider {
            model: "gpt-3.5-turbo".to_string(),
            text: "recovered".to_string(),
            tokens: 10,
            fail_times: std::sync::atomic::AtomicU32::new(2),
        };
        let mut client = LlmClient::new(provider, PriceTable::uniform(0.000002));
        client.retry_policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let result = client
            .complete(&[ChatMessage { role: "user".to_string(), content: "hi".to_string() }], 0.7, 512, 1.0)
            .await
            .unwrap();
        assert_eq!(result.text, "recovered");
    }
}
