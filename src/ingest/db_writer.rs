use rusqlite::params;
use chrono::{Utc, TimeZone};
use sha2::{Sha256, Digest};
use crate::error::{Result, RagmcpError};
use crate::db::Db;
use super::chunker::Chunk;

/// Insert or update a document in the database
/// 
/// Returns the document ID (SHA256 hash of doc_path).
/// Uses ON CONFLICT to update existing documents based on doc_path.
pub async fn insert_document(
    db: &Db,
    doc_path: &str,
    doc_type: &str,
    namespace: &str,
    agent_name: Option<&str>,
    content: &str,
    tokens: usize,
    file_hash: &str,
    last_modified: std::time::SystemTime,
) -> Result<String> {
    // Compute doc_id as SHA256 hash of doc_path
    let mut hasher = Sha256::new();
    hasher.update(doc_path.as_bytes());
    let doc_id = format!("{:x}", hasher.finalize());
    
    // Convert SystemTime to chrono::DateTime
    let modified_dt = last_modified
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| RagmcpError::Config("Invalid file modification time".to_string()))?;
    let modified_chrono = Utc.timestamp_opt(
        modified_dt.as_secs() as i64,
        modified_dt.subsec_nanos(),
    )
    .single()
    .ok_or_else(|| RagmcpError::Config("Failed to convert timestamp".to_string()))?;
    
    // Clone values to move into closure
    let doc_id_clone = doc_id.clone();
    let doc_path_clone = doc_path.to_string();
    let doc_type_clone = doc_type.to_string();
    let namespace_clone = namespace.to_string();
    let agent_name_clone = agent_name.map(|s| s.to_string());
    let content_clone = content.to_string();
    let tokens_clone = tokens;
    let modified_str = modified_chrono.to_rfc3339();
    let file_hash_clone = file_hash.to_string();
    
    db.with_connection(move |conn| {
        // Delete old chunks if document exists (CASCADE should handle this, but be explicit)
        conn.execute(
            "DELETE FROM chunks WHERE doc_id = ?1",
            params![doc_id_clone],
        )?;
        
        // Insert or update document
        conn.execute(
            r#"
            INSERT INTO documents (
                doc_id, doc_path, doc_type, namespace, agent_name,
                content_text, content_tokens, last_modified, file_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(doc_path) DO UPDATE SET
                doc_id = excluded.doc_id,
                doc_type = excluded.doc_type,
                namespace = excluded.namespace,
                agent_name = excluded.agent_name,
                content_text = excluded.content_text,
                content_tokens = excluded.content_tokens,
                last_modified = excluded.last_modified,
                file_hash = excluded.file_hash
            "#,
            params![
                doc_id_clone,
                doc_path_clone,
                doc_type_clone,
                namespace_clone,
                agent_name_clone,
                content_clone,
                tokens_clone as i64,
                modified_str,
                file_hash_clone,
            ],
        )?;
        
        Ok::<(), RagmcpError>(())
    }).await?;

    Ok(doc_id.clone())
}

/// Insert chunks in batches
/// 
/// Inserts chunks in batches of 100 for efficiency.
/// FTS5 triggers automatically populate chunks_fts on insert.
pub async fn insert_chunks(
    db: &Db,
    doc_id: &str,
    chunks: Vec<Chunk>,
) -> Result<usize> {
    if chunks.is_empty() {
        return Ok(0);
    }
    
    // Clone doc_id to move into closure
    let doc_id = doc_id.to_string();
    let count = db.with_connection(move |conn| {
        let mut count = 0;
        const BATCH_SIZE: usize = 100;
        
        for batch in chunks.chunks(BATCH_SIZE) {
            // Use prepared statement for batch insert
            let mut stmt = conn.prepare(
                r#"
                INSERT INTO chunks (
                    chunk_id, doc_id, chunk_index, chunk_text,
                    chunk_tokens, section_header, chunk_type
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#
            )?;
            
            for (idx, chunk) in batch.iter().enumerate() {
                let chunk_id = format!("{}::{}", doc_id, count + idx);
                
                stmt.execute(params![
                    chunk_id,
                    doc_id,
                    (count + idx) as i64,
                    chunk.text,
                    chunk.tokens as i64,
                    chunk.section_header,
                    chunk.chunk_type,
                ])?;
            }
            
            count += batch.len();
        }
        
        Ok::<usize, RagmcpError>(count)
    }).await?;

    Ok(count)
}

/// Load (doc_path, content_text, namespace) for every persisted document.
/// Used by CLI tools that rebuild `RagCore`'s in-memory indices from the
/// durable SQLite store on startup, since the indices themselves hold no
/// on-disk snapshot (Non-goal: on-disk snapshot/compaction of the vector index).
pub async fn load_all_documents(db: &Db) -> Result<Vec<(String, String, String)>> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare(
            "SELECT doc_path, content_text, namespace FROM documents ORDER BY doc_path",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok::<Vec<(String, String, String)>, RagmcpError>(out)
    })
    .await
}
