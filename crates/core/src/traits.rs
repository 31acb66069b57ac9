use crate::models::{Candidate, Chunk, DocumentFingerprint, DuplicatePolicy};
use crate::SearchError;
use async_trait::async_trait;

pub const VECTOR_INDEX_NAME: &str = "chunk_embeddings";

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn ensure_vector_index(&self, dimension: usize) -> Result<(), SearchError>;

    async fn upsert_document(&self, document: &DocumentFingerprint) -> Result<(), SearchError>;

    async fn document_exists(&self, filename: &str) -> Result<bool, SearchError>;

    /// Writes every chunk of the batch or none of them. `Replace` drops the
    /// document's earlier chunks in the same write.
    async fn write_chunks(
        &self,
        filename: &str,
        chunks: &[Chunk],
        policy: DuplicatePolicy,
    ) -> Result<(), SearchError>;

    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filename: &str,
    ) -> Result<Vec<Candidate>, SearchError>;

    async fn entity_search(
        &self,
        entities: &[String],
        filename: &str,
    ) -> Result<Vec<Candidate>, SearchError>;

    async fn list_document_filenames(&self) -> Result<Vec<String>, SearchError>;
}
