use crate::db::Db;
use crate::error::{Result, RagmcpError};
use rusqlite::params;

/// Store an embedding for a chunk in the database
/// 
/// # Arguments
/// 
/// * `db` - Database connection wrapper
/// * `chunk_id` - Chunk identifier
/// * `embedding` - Embedding vector (1536 dimensions for text-embedding-3-small)
/// 
/// # Returns
/// 
/// Ok(()) on success, error if chunk not found or database operation fails
pub async fn store_embedding(
    db: &Db,
    chunk_id: &str,
    embedding: &[f32],
) -> Result<()> {
    // Convert Vec<f32> to BLOB (raw bytes, little-endian)
    let bytes: Vec<u8> = embedding
        .iter()
        .flat_map(|f| f.to_le_bytes())
        .collect();
    
    let chunk_id_clone = chunk_id.to_string();
    
    db.with_connection(move |conn| {
        let rows_affected = conn.execute(
            "UPDATE chunks SET embedding = ? WHERE chunk_id = ?",
            params![bytes, chunk_id_clone],
        )?;
        
        if rows_affected == 0 {
            return Err(RagmcpError::ChunkNotFound(chunk_id_clone));
        }
        
        Ok::<(), RagmcpError>(())
    })
    .await?;
    
    Ok(())
}

/// Retrieve an embedding for a chunk from the database
/// 
/// # Arguments
/// 
/// * `db` - Database connection wrapper
/// * `chunk_id` - Chunk identifier
/// 
/// # Returns
/// 
/// Embedding vector (1536 dimensions) or error if chunk not found or has no embedding
pub async fn get_embedding(db: &Db, chunk_id: &str) -> Result<Vec<f32>> {
    let chunk_id_clone = chunk_id.to_string();
    
    let embedding = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare("SELECT embedding FROM chunks WHERE chunk_id = ?")?;
            
            let mut rows = stmt.query(params![chunk_id_clone])?;
            
            if let Some(row) = rows.next()? {
                let blob: Option<Vec<u8>> = row.get(0)?;
                
                if let Some(blob) = blob {
                    // Convert BLOB back to Vec<f32>
                    let mut floats = Vec::new();
                    for bytes in blob.chunks(4) {
                        let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                            RagmcpError::Embedding("Invalid embedding BLOB length".to_string())
                        })?;
                        floats.push(f32::from_le_bytes(arr));
                    }
                    
                    Ok(Some(floats))
                } else {
                    Ok(None)
                }
            } else {
                Ok(None)
            }
        })
        .await?;
    
    embedding.ok_or_else(|| RagmcpError::ChunkNotFound(chunk_id.to_string()))
}

/// Store multiple embeddings in a batch for better performance
/// 
/// # Arguments
/// 
/// * `db` - Database connection wrapper
/// * `embeddings` - Vector of (chunk_id, embedding) tuples
/// 
/// # Returns
/// 
/// Number of embeddings successfully stored
pub async fn store_embeddings_batch(
    db: &Db,
    embeddings: Vec<(String, Vec<f32>)>,
) -> Result<usize> {
    if embeddings.is_empty() {
        return Ok(0);
    }
    
    let embeddings_clone = embeddings.clone();
    
    let count = db
        .with_connection(move |conn| {
            // Use a transaction for better performance and atomicity
            let tx = conn.transaction()?;
            
            let mut success_count = 0;
            
            for (chunk_id, embedding) in embeddings_clone {
                // Convert embedding to BLOB
                let bytes: Vec<u8> = embedding
                    .iter()
                    .flat_map(|f| f.to_le_bytes())
                    .collect();
                
                match tx.execute(
                    "UPDATE chunks SET embedding = ? WHERE chunk_id = ?",
                    params![bytes, chunk_id],
                ) {
                    Ok(rows_affected) => {
                        if rows_affected > 0 {
                            success_count += 1;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to store embedding for chunk {}: {}", chunk_id, e);
                        // Continue with other embeddings
                    }
                }
            }
            
            tx.commit()?;
            Ok::<usize, RagmcpError>(success_count)
        })
        .await?;
    
    Ok(count)
}

/// Return (chunk_id, chunk_text) for all chunks of a document that have no embedding yet.
/// Used by the watch module to embed only new chunks after re-ingestion.
pub async fn get_chunks_without_embedding_for_doc(
    db: &Db,
    doc_id: &str,
) -> Result<Vec<(String, String)>> {
    let doc_id = doc_id.to_string();
    let chunks = db
        .with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_id, chunk_text FROM chunks WHERE doc_id = ?1 AND embedding IS NULL",
            )?;
            let rows = stmt.query_map([&doc_id], |row| {
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
