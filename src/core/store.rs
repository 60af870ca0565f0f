//! In-memory hydration layer between the indices (which only know chunk ids)
//! and the orchestrator (which needs full passage content/title/source/url
//! to build a `RetrievedPassage`). Grounded on the teacher's `db::Db` row
//! shapes for `documents`/`chunks`, generalized to an in-process map since
//! C4/C5 here don't delegate storage to SQLite (see `core::bm25_index`,
//! `core::vector_index`).

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::types::{Chunk, Document};

struct StoredChunk {
    chunk: Chunk,
    parent: Document,
}

/// Owns the authoritative `Document`/`Chunk` records a request-scoped
/// retrieval pass reads passage fields from.
#[derive(Default)]
pub struct DocumentStore {
    chunks: RwLock<HashMap<String, StoredChunk>>,
    documents: RwLock<HashMap<String, Document>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_document(&self, document: Document) {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document);
    }

    /// Inserts `chunks`, each resolved against its already-inserted parent
    /// document. Chunks whose `parent_id` has no matching document are
    /// skipped (the caller is expected to insert documents first).
    pub async fn insert_chunks(&self, chunks: Vec<Chunk>) {
        let documents = self.documents.read().await;
        let mut store = self.chunks.write().await;
        for chunk in chunks {
            if let Some(parent) = documents.get(&chunk.parent_id).cloned() {
                store.insert(chunk.id.clone(), StoredChunk { chunk, parent });
            }
        }
    }

    /// Removes a document and every chunk derived from it (spec §3:
    /// "deleting a document removes all derived chunks... atomically from
    /// the implementer's point of view").
    pub async fn delete_document(&self, document_id: &str) -> Vec<String> {
        self.documents.write().await.remove(document_id);
        let mut store = self.chunks.write().await;
        let removed: Vec<String> = store
            .iter()
            .filter(|(_, sc)| sc.chunk.parent_id == document_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            store.remove(id);
        }
        removed
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Option<Chunk> {
        self.chunks.read().await.get(chunk_id).map(|sc| sc.chunk.clone())
    }

    /// `(content, title, source, url)` for building a `RetrievedPassage`.
    pub async fn passage_fields(
        &self,
        chunk_id: &str,
    ) -> Option<(String, Option<String>, String, Option<String>)> {
        let store = self.chunks.read().await;
        let stored = store.get(chunk_id)?;
        Some((
            stored.chunk.text.clone(),
            stored.parent.title.clone(),
            stored.parent.source.clone(),
            stored.parent.url.clone(),
        ))
    }

    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn chunk_count(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Drop every document and chunk (spec §6 `Ingest(..., reset=true)`).
    pub async fn clear(&self) {
        self.documents.write().await.clear();
        self.chunks.write().await.clear();
    }
}
