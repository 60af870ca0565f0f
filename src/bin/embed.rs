use clap::Parser;
use ragcore::db::{migrate, Db};
use ragcore::embeddings::{store_embeddings_batch, OpenAIEmbedder};
use ragcore::error::RagmcpError;
use ragcore::Config;
use std::path::Path;
use std::time::Instant;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "embed")]
#[command(about = "Generate embeddings for chunks (incremental: only chunks without embeddings by default)")]
struct Args {
    /// Re-embed all chunks (ignore existing embeddings)
    #[arg(short, long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", "info"),
    )
    .init();

    let args = Args::parse();

    log::info!("Starting RAGMcp embedding generation");
    log::info!(
        "Embedding strategy: {}",
        if args.force { "FORCE (all chunks)" } else { "INCREMENTAL (new chunks only)" }
    );

    let config = Config::load()?;
    let db = Db::new(config.db_path());

    let migrations_dir = Path::new("migrations");
    db.with_connection(|conn| migrate::run_migrations(conn, migrations_dir)).await?;

    let api_key = std::env::var(&config.embeddings.api_key_env).map_err(|_| {
        anyhow::anyhow!(
            "Environment variable {} not set. Set it in your .env file or as an environment variable.",
            config.embeddings.api_key_env
        )
    })?;
    let embedder = OpenAIEmbedder::new(
        api_key,
        config.embeddings.model.clone(),
        config.embeddings.batch_size,
    );

    let pending = fetch_pending_chunks(&db, args.force).await?;
    log::info!("Found {} chunk(s) needing embeddings", pending.len());
    if pending.is_empty() {
        return Ok(());
    }

    let start = Instant::now();
    let mut stored = 0usize;
    for batch in pending.chunks(config.embeddings.batch_size) {
        let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
        let embeddings = embedder.embed_batch(texts).await?;
        let pairs: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|(id, _)| id.clone())
            .zip(embeddings)
            .collect();
        stored += store_embeddings_batch(&db, pairs).await?;
    }

    log::info!("Embedded {} chunk(s) in {:?}", stored, start.elapsed());
    Ok(())
}

/// Fetch (chunk_id, chunk_text) for every chunk needing an embedding.
/// With `force`, returns every chunk regardless of existing embedding.
async fn fetch_pending_chunks(db: &Db, force: bool) -> Result<Vec<(String, String)>> {
    let query = if force {
        "SELECT chunk_id, chunk_text FROM chunks"
    } else {
        "SELECT chunk_id, chunk_text FROM chunks WHERE embedding IS NULL"
    };
    let query = query.to_string();
    let chunks = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<Vec<(String, String)>, RagmcpError>(out)
        })
        .await?;
    Ok(chunks)
}
