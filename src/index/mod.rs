//! Document indexing: chunk → embed → upsert into the user's collection.

pub mod cache;
pub mod chunker;
pub mod store;

use tracing::debug;

use crate::error::AppError;
use crate::gmail::MailDocument;
use crate::llm::embeddings::Embedder;

use chunker::Chunker;
use store::{ChunkMetadata, ChunkRecord, VectorStore, collection_name};

pub struct Indexer {
    chunker: Chunker,
    embedder: Embedder,
    store: VectorStore,
}

impl Indexer {
    pub fn new(chunker: Chunker, embedder: Embedder, store: VectorStore) -> Self {
        Self {
            chunker,
            embedder,
            store,
        }
    }

    /// Chunk and embed `documents`, then append every chunk to the user's
    /// collection. Returns the number of chunks written.
    ///
    /// Append-only: indexing the same document twice duplicates its chunks,
    /// so callers must pass only not-yet-cached documents.
    pub async fn index(&self, documents: &[MailDocument], user_id: i64) -> Result<usize, AppError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut texts = Vec::new();
        let mut metadata = Vec::new();
        for doc in documents {
            let combined = doc.combined_text();
            for chunk_text in self.chunker.split(&combined) {
                texts.push(chunk_text);
                metadata.push(ChunkMetadata {
                    subject: doc.subject.clone(),
                    from: doc.from.clone(),
                    thread_id: doc.thread_id.clone(),
                });
            }
        }

        if texts.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embedder.embed(&texts).await?;

        let records: Vec<ChunkRecord> = texts
            .into_iter()
            .zip(metadata)
            .zip(embeddings)
            .map(|((text, metadata), embedding)| ChunkRecord {
                id: uuid::Uuid::now_v7().to_string(),
                text,
                metadata,
                embedding,
            })
            .collect();

        let collection = collection_name(user_id);
        let written = self.store.upsert(&collection, &records)?;
        debug!(%collection, documents = documents.len(), chunks = written, "indexed documents");
        Ok(written)
    }
}
