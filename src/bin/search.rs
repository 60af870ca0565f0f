use ragcore::core::{self, types::{MetadataFilter, Query}, IngestDocument};
use ragcore::db::{migrate, Db};
use ragcore::ingest::load_all_documents;
use ragcore::Config;
use std::path::Path;
use std::time::Instant;

/// Parse CLI args: optional --namespace <val>; first positional is the query.
fn parse_search_args() -> anyhow::Result<(String, Option<String>)> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut query = None;
    let mut namespace = None;
    let mut next_namespace = false;
    for arg in &args {
        if next_namespace {
            namespace = Some(arg.clone());
            next_namespace = false;
            continue;
        }
        if arg == "--namespace" {
            next_namespace = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        if query.is_none() {
            query = Some(arg.clone());
        }
    }
    let query = query.ok_or_else(|| anyhow::anyhow!(
        "Usage: search <query> [--namespace <ns>]\nExample: search \"module overview\" --namespace agents"
    ))?;
    if query.trim().is_empty() {
        anyhow::bail!("Query cannot be empty");
    }
    Ok((query, namespace))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load()?;
    let (query_text, namespace) = parse_search_args()?;

    // The retrieval indices hold no on-disk snapshot, so rebuild them from the
    // durable document store before querying.
    let db = Db::new(config.db_path());
    db.with_connection(|conn| migrate::run_migrations(conn, Path::new("migrations"))).await?;
    let documents = load_all_documents(&db).await?;
    log::info!("Rebuilding retrieval indices from {} persisted document(s)", documents.len());

    let rag_core = core::build(&config)?;
    let ingest_docs: Vec<IngestDocument> = documents
        .into_iter()
        .map(|(doc_path, content, namespace)| {
            let mut metadata = std::collections::HashMap::new();
            metadata.insert("namespace".to_string(), namespace.clone());
            IngestDocument {
                content,
                source: namespace,
                title: Some(doc_path),
                url: None,
                metadata,
            }
        })
        .collect();
    rag_core.ingest(ingest_docs, true).await;

    let mut filter = MetadataFilter::default();
    if let Some(ns) = namespace {
        filter.equals.insert("source".to_string(), ns);
    }

    let query = Query {
        text: query_text.clone(),
        max_results: config.search.default_k,
        filter,
        temperature: None,
        max_tokens: None,
        forced_variant: None,
        user_id: None,
        session_id: None,
    };

    let start = Instant::now();
    let answer = rag_core.query(query).await;
    let duration = start.elapsed();

    println!("\n=== RAGMcp Hybrid Search ===\n");
    println!("Query: \"{}\"\n", query_text);
    println!("Variant: {}", answer.variant);
    println!("Answer:\n{}\n", answer.answer_text);

    if answer.passages.is_empty() {
        println!("No supporting passages found.");
    } else {
        for passage in &answer.passages {
            println!("─────────────────────────────────────────────");
            println!("{} (score: {:.3})", passage.chunk_id, passage.fused_score);
            let preview_len = passage.content.len().min(200);
            println!("{}{}", &passage.content[..preview_len], if passage.content.len() > 200 { "..." } else { "" });
        }
    }

    println!("\nLatency: {:?} (reported cost: ${:.6})", duration, answer.cost_usd);
    if duration.as_millis() > config.performance.max_latency_ms as u128 {
        println!("Warning: latency exceeded target of {}ms", config.performance.max_latency_ms);
    }

    Ok(())
}
