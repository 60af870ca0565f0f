use crate::core::types::{MetadataFilter, Query};
use crate::core::{DefaultRagCore, FeedbackKind, IngestDocument};
use crate::error::{RagmcpError, Result};
use crate::mcp::types::{ContentItem, Tool, ToolsCallResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Get all tool definitions for tools/list
pub fn get_tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "ragcore_query".to_string(),
            description: "Answer a question via hybrid BM25+vector retrieval, optional re-ranking, and LLM synthesis".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The question to answer",
                        "minLength": 1
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of passages to retrieve",
                        "default": 4,
                        "minimum": 1,
                        "maximum": 20
                    },
                    "namespace": {
                        "type": "string",
                        "description": "Filter passages whose 'source' metadata equals this value"
                    },
                    "forced_variant": {
                        "type": "string",
                        "description": "Force a specific experiment variant (baseline/reranked/hybrid/finetuned) instead of letting the router assign one",
                        "enum": ["baseline", "reranked", "hybrid", "finetuned"]
                    },
                    "user_id": {
                        "type": "string",
                        "description": "Stable identifier used for variant assignment and caching"
                    },
                    "session_id": {
                        "type": "string"
                    }
                },
                "required": ["query"]
            }),
        },
        Tool {
            name: "ragcore_ingest".to_string(),
            description: "Chunk, embed, and index one or more documents".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "documents": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": {"type": "string"},
                                "source": {"type": "string"},
                                "title": {"type": "string"},
                                "url": {"type": "string"}
                            },
                            "required": ["content", "source"]
                        }
                    },
                    "reset": {
                        "type": "boolean",
                        "description": "Drop all previously indexed documents before ingesting",
                        "default": false
                    }
                },
                "required": ["documents"]
            }),
        },
        Tool {
            name: "ragcore_vector_store_status".to_string(),
            description: "Report the health and document count of the retrieval indices".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        Tool {
            name: "ragcore_feedback".to_string(),
            description: "Record user feedback on a prior answer".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "result_id": {"type": "string", "description": "The query_id of the answer being rated"},
                    "kind": {"type": "string", "enum": ["thumbs", "rating", "correction", "implicit"]},
                    "value": {"type": "number", "description": "1-5 for rating, +-1 for thumbs, arbitrary for implicit"},
                    "comment": {"type": "string"}
                },
                "required": ["result_id", "kind", "value"]
            }),
        },
        Tool {
            name: "ragcore_experiment_stats".to_string(),
            description: "Report per-variant success rate, confidence interval, and significance vs. the baseline".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "experiment_id": {"type": "string", "default": "default"}
                }
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
    namespace: Option<String>,
    forced_variant: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
}

fn default_max_results() -> usize {
    4
}

/// Handle ragcore_query: builds a `Query`, runs `RagCore::query`, and
/// reports the synthesized answer plus its supporting passages.
pub async fn handle_query(core: &DefaultRagCore, arguments: &Value) -> Result<ToolsCallResult> {
    let params: QueryParams = serde_json::from_value(arguments.clone())
        .map_err(|e| RagmcpError::Config(format!("Invalid query params: {}", e)))?;

    let mut filter = MetadataFilter::default();
    if let Some(namespace) = params.namespace {
        filter.equals.insert("source".to_string(), namespace);
    }

    let query = Query {
        text: params.query,
        max_results: params.max_results,
        filter,
        temperature: None,
        max_tokens: None,
        forced_variant: params.forced_variant,
        user_id: params.user_id,
        session_id: params.session_id,
    };

    let answer = core.query(query).await;
    let text = serde_json::to_string_pretty(&answer)
        .map_err(|e| RagmcpError::Config(format!("JSON serialization error: {}", e)))?;

    Ok(ToolsCallResult {
        content: vec![ContentItem { content_type: "text".to_string(), text }],
        is_error: None,
    })
}

#[derive(Debug, Deserialize)]
struct IngestDocParam {
    content: String,
    source: String,
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct IngestParams {
    documents: Vec<IngestDocParam>,
    #[serde(default)]
    reset: bool,
}

/// Handle ragcore_ingest: indexes each document through `RagCore::ingest`.
pub async fn handle_ingest(core: &DefaultRagCore, arguments: &Value) -> Result<ToolsCallResult> {
    let params: IngestParams = serde_json::from_value(arguments.clone())
        .map_err(|e| RagmcpError::Config(format!("Invalid ingest params: {}", e)))?;

    let documents = params
        .documents
        .into_iter()
        .map(|d| IngestDocument {
            content: d.content,
            source: d.source,
            title: d.title,
            url: d.url,
            metadata: d.metadata,
        })
        .collect();

    let result = core.ingest(documents, params.reset).await;
    let text = serde_json::to_string(&result)
        .map_err(|e| RagmcpError::Config(format!("JSON serialization error: {}", e)))?;

    Ok(ToolsCallResult {
        content: vec![ContentItem { content_type: "text".to_string(), text }],
        is_error: None,
    })
}

/// Handle ragcore_vector_store_status.
pub async fn handle_vector_store_status(core: &DefaultRagCore) -> Result<ToolsCallResult> {
    let status = core.vector_store_status().await;
    let text = serde_json::to_string(&status)
        .map_err(|e| RagmcpError::Config(format!("JSON serialization error: {}", e)))?;

    Ok(ToolsCallResult {
        content: vec![ContentItem { content_type: "text".to_string(), text }],
        is_error: None,
    })
}

#[derive(Debug, Deserialize)]
struct FeedbackParams {
    result_id: String,
    kind: FeedbackKind,
    value: f64,
    comment: Option<String>,
}

/// Handle ragcore_feedback.
pub async fn handle_feedback(core: &DefaultRagCore, arguments: &Value) -> Result<ToolsCallResult> {
    let params: FeedbackParams = serde_json::from_value(arguments.clone())
        .map_err(|e| RagmcpError::Config(format!("Invalid feedback params: {}", e)))?;

    match core.feedback(params.result_id, params.kind, params.value, params.comment) {
        Ok(()) => Ok(ToolsCallResult {
            content: vec![ContentItem {
                content_type: "text".to_string(),
                text: json!({"success": true}).to_string(),
            }],
            is_error: None,
        }),
        Err(e) => Ok(ToolsCallResult {
            content: vec![ContentItem {
                content_type: "text".to_string(),
                text: format!("Error: {}", e),
            }],
            is_error: Some(true),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ExperimentStatsParams {
    #[serde(default = "default_experiment_id")]
    experiment_id: String,
}

fn default_experiment_id() -> String {
    "default".to_string()
}

/// Handle ragcore_experiment_stats.
pub async fn handle_experiment_stats(core: &DefaultRagCore, arguments: &Value) -> Result<ToolsCallResult> {
    let params: ExperimentStatsParams = serde_json::from_value(arguments.clone())
        .map_err(|e| RagmcpError::Config(format!("Invalid experiment_stats params: {}", e)))?;

    let report = core.experiment_stats(&params.experiment_id).await;
    let text = serde_json::to_string_pretty(&report)
        .map_err(|e| RagmcpError::Config(format!("JSON serialization error: {}", e)))?;

    Ok(ToolsCallResult {
        content: vec![ContentItem { content_type: "text".to_string(), text }],
        is_error: None,
    })
}
