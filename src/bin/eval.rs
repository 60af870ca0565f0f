//! Evaluation CLI: runs a batch of queries through the full RagCore
//! pipeline (retrieval + synthesis + RAGAS scoring) and reports the
//! per-query and aggregate evaluation scores.

use clap::Parser;
use ragcore::core::{self, types::Query, IngestDocument};
use ragcore::db::{migrate, Db};
use ragcore::ingest::load_all_documents;
use ragcore::Config;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "eval")]
struct Args {
    /// Path to eval queries JSON (default: eval_queries.json).
    #[arg(long, default_value = "eval_queries.json")]
    queries: PathBuf,
}

#[derive(Debug, Deserialize)]
struct EvalQuery {
    query: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = Config::load()?;

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

    let queries_json = std::fs::read_to_string(&args.queries)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.queries.display(), e))?;
    let queries: Vec<EvalQuery> =
        serde_json::from_str(&queries_json).map_err(|e| anyhow::anyhow!("Invalid queries JSON: {}", e))?;

    if queries.is_empty() {
        anyhow::bail!("No queries in {}", args.queries.display());
    }

    println!("Running evaluation on {} queries\n", queries.len());

    let mut overall_scores = Vec::with_capacity(queries.len());
    let mut faithfulness_scores = Vec::with_capacity(queries.len());
    let mut relevancy_scores = Vec::with_capacity(queries.len());
    let mut recall_scores = Vec::with_capacity(queries.len());

    for eval_query in &queries {
        let answer = rag_core.query(Query::new(eval_query.query.clone())).await;

        match &answer.evaluation {
            Some(eval) => {
                overall_scores.push(eval.overall);
                faithfulness_scores.push(eval.answer_faithfulness);
                relevancy_scores.push(eval.answer_relevancy);
                recall_scores.push(eval.context_recall);

                println!(
                    "  {} (overall: {:.2}, faithfulness: {:.2}, relevancy: {:.2}, recall: {:.2})",
                    eval_query.query, eval.overall, eval.answer_faithfulness, eval.answer_relevancy, eval.context_recall
                );
            }
            None => {
                println!("  {} (no evaluation produced, status: {:?})", eval_query.query, answer.status);
            }
        }
    }

    if overall_scores.is_empty() {
        println!("\nNo evaluated answers to summarize.");
        return Ok(());
    }

    let avg = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
    let avg_overall = avg(&overall_scores);
    let avg_faithfulness = avg(&faithfulness_scores);
    let avg_relevancy = avg(&relevancy_scores);
    let avg_recall = avg(&recall_scores);

    println!("\n=== Evaluation Results ===");
    println!("Overall:              {:.3}", avg_overall);
    println!("Answer faithfulness:  {:.3}", avg_faithfulness);
    println!("Answer relevancy:     {:.3}", avg_relevancy);
    println!("Context recall:       {:.3}", avg_recall);

    const THRESHOLD_OVERALL: f64 = 0.80;

    if avg_overall >= THRESHOLD_OVERALL {
        println!("\nOverall score meets threshold (>= {:.2}).", THRESHOLD_OVERALL);
        std::process::exit(0);
    } else {
        println!("\nOverall score below threshold (>= {:.2}).", THRESHOLD_OVERALL);
        std::process::exit(1);
    }
}
