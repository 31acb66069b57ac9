use crate::embeddings::cosine_similarity;
use crate::models::{Candidate, Chunk, DocumentFingerprint, DuplicatePolicy, RetrievalMode};
use crate::traits::GraphStore;
use crate::SearchError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    index_dimension: Option<usize>,
    documents: BTreeMap<String, DocumentFingerprint>,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    pub async fn chunks_for(&self, filename: &str) -> Vec<Chunk> {
        self.state
            .read()
            .await
            .chunks
            .iter()
            .filter(|chunk| chunk.source == filename)
            .cloned()
            .collect()
    }

    pub async fn entity_names(&self) -> BTreeSet<String> {
        self.state
            .read()
            .await
            .chunks
            .iter()
            .flat_map(|chunk| chunk.entities.iter().cloned())
            .collect()
    }
}

fn validate_batch(state: &MemoryState, filename: &str, chunks: &[Chunk]) -> Result<(), SearchError> {
    let dimension = state
        .index_dimension
        .ok_or_else(|| SearchError::NotReady("vector index has not been declared".to_string()))?;

    if !state.documents.contains_key(filename) {
        return Err(SearchError::NotReady(format!("document {filename} has not been upserted")));
    }

    let mut seen = HashSet::new();
    for chunk in chunks {
        if chunk.source != filename {
            return Err(SearchError::Request(format!(
                "chunk from {} cannot be written under {filename}",
                chunk.source
            )));
        }
        if chunk.text.is_empty() {
            return Err(SearchError::Request(format!(
                "chunk {} on page {} has no text",
                chunk.position, chunk.page_number
            )));
        }
        if chunk.embedding.len() != dimension {
            return Err(SearchError::DimensionMismatch {
                expected: dimension,
                actual: chunk.embedding.len(),
            });
        }
        if !seen.insert(chunk.key()) {
            return Err(SearchError::Request(format!(
                "duplicate chunk position {} in batch",
                chunk.position
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn ensure_vector_index(&self, dimension: usize) -> Result<(), SearchError> {
        let mut state = self.state.write().await;
        match state.index_dimension {
            Some(existing) if existing != dimension => Err(SearchError::DimensionMismatch {
                expected: existing,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                state.index_dimension = Some(dimension);
                Ok(())
            }
        }
    }

    async fn upsert_document(&self, document: &DocumentFingerprint) -> Result<(), SearchError> {
        let mut state = self.state.write().await;
        state
            .documents
            .insert(document.filename.clone(), document.clone());
        Ok(())
    }

    async fn document_exists(&self, filename: &str) -> Result<bool, SearchError> {
        Ok(self.state.read().await.documents.contains_key(filename))
    }

    async fn write_chunks(
        &self,
        filename: &str,
        chunks: &[Chunk],
        policy: DuplicatePolicy,
    ) -> Result<(), SearchError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        validate_batch(&state, filename, chunks)?;

        let has_chunks = state.chunks.iter().any(|chunk| chunk.source == filename);
        match policy {
            DuplicatePolicy::Reject if has_chunks => {
                return Err(SearchError::Request(format!("{filename} already has chunks")));
            }
            DuplicatePolicy::Replace => state.chunks.retain(|chunk| chunk.source != filename),
            DuplicatePolicy::Reject | DuplicatePolicy::Append => {}
        }

        state.chunks.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filename: &str,
    ) -> Result<Vec<Candidate>, SearchError> {
        let state = self.state.read().await;
        let Some(dimension) = state.index_dimension else {
            return Ok(Vec::new());
        };
        if embedding.len() != dimension {
            return Err(SearchError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }

        let mut scored: Vec<(f32, &Chunk)> = state
            .chunks
            .iter()
            .filter(|chunk| chunk.source == filename)
            .map(|chunk| (cosine_similarity(embedding, &chunk.embedding), chunk))
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, chunk)| Candidate {
                chunk: chunk.clone(),
                score: Some(f64::from(score)),
                mode: RetrievalMode::Vector,
            })
            .collect())
    }

    async fn entity_search(
        &self,
        entities: &[String],
        filename: &str,
    ) -> Result<Vec<Candidate>, SearchError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let wanted: HashSet<&str> = entities.iter().map(String::as_str).collect();
        let state = self.state.read().await;
        let mut hits: Vec<&Chunk> = state
            .chunks
            .iter()
            .filter(|chunk| chunk.source == filename)
            .filter(|chunk| chunk.entities.iter().any(|name| wanted.contains(name.as_str())))
            .collect();
        hits.sort_by_key(|chunk| (chunk.page_number, chunk.position));

        Ok(hits
            .into_iter()
            .map(|chunk| Candidate {
                chunk: chunk.clone(),
                score: None,
                mode: RetrievalMode::Graph,
            })
            .collect())
    }

    async fn list_document_filenames(&self) -> Result<Vec<String>, SearchError> {
        Ok(self.state.read().await.documents.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fingerprint(filename: &str) -> DocumentFingerprint {
        DocumentFingerprint {
            filename: filename.to_string(),
            source_path: format!("/tmp/{filename}"),
            checksum: "abc".to_string(),
            ingested_at: Utc::now(),
        }
    }

    fn chunk(filename: &str, position: u64, embedding: Vec<f32>, entities: &[&str]) -> Chunk {
        let mut chunk = Chunk::new(filename, 1, position, format!("chunk {position}"));
        chunk.embedding = embedding;
        chunk.entities = entities.iter().map(|name| name.to_string()).collect();
        chunk
    }

    async fn ready_store(filenames: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.ensure_vector_index(2).await.expect("index");
        for filename in filenames {
            store.upsert_document(&fingerprint(filename)).await.expect("upsert");
        }
        store
    }

    #[tokio::test]
    async fn index_declaration_is_idempotent_but_dimension_is_fixed() {
        let store = InMemoryStore::new();
        store.ensure_vector_index(384).await.expect("first declaration");
        store.ensure_vector_index(384).await.expect("repeat declaration");
        assert!(matches!(
            store.ensure_vector_index(128).await,
            Err(SearchError::DimensionMismatch { expected: 384, actual: 128 })
        ));
    }

    #[tokio::test]
    async fn mismatched_embedding_fails_the_whole_batch() {
        let store = ready_store(&["a.pdf"]).await;
        let batch = vec![
            chunk("a.pdf", 1, vec![1.0, 0.0], &[]),
            chunk("a.pdf", 2, vec![1.0, 0.0, 0.0], &[]),
        ];

        let result = store.write_chunks("a.pdf", &batch, DuplicatePolicy::Append).await;
        assert!(matches!(result, Err(SearchError::DimensionMismatch { .. })));
        assert!(store.chunks_for("a.pdf").await.is_empty());
    }

    #[tokio::test]
    async fn write_requires_declared_index_and_document() {
        let store = InMemoryStore::new();
        let batch = vec![chunk("a.pdf", 1, vec![1.0, 0.0], &[])];
        assert!(matches!(
            store.write_chunks("a.pdf", &batch, DuplicatePolicy::Append).await,
            Err(SearchError::NotReady(_))
        ));

        store.ensure_vector_index(2).await.expect("index");
        assert!(matches!(
            store.write_chunks("a.pdf", &batch, DuplicatePolicy::Append).await,
            Err(SearchError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn vector_search_before_any_index_returns_no_hits() {
        let store = InMemoryStore::new();
        let hits = store.vector_search(&[1.0, 0.0], 5, "a.pdf").await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn vector_search_is_scoped_and_ranked() {
        let store = ready_store(&["a.pdf", "b.pdf"]).await;
        let a = vec![
            chunk("a.pdf", 1, vec![0.0, 1.0], &[]),
            chunk("a.pdf", 2, vec![1.0, 0.1], &[]),
            chunk("a.pdf", 3, vec![1.0, 1.0], &[]),
        ];
        let b = vec![chunk("b.pdf", 1, vec![1.0, 0.0], &[])];
        store.write_chunks("a.pdf", &a, DuplicatePolicy::Append).await.expect("write a");
        store.write_chunks("b.pdf", &b, DuplicatePolicy::Append).await.expect("write b");

        let hits = store.vector_search(&[1.0, 0.0], 2, "a.pdf").await.expect("search");
        let positions: Vec<u64> = hits.iter().map(|hit| hit.chunk.position).collect();
        assert_eq!(positions, vec![2, 3]);
        assert!(hits.iter().all(|hit| hit.chunk.source == "a.pdf" && hit.score.is_some()));
    }

    #[tokio::test]
    async fn entity_search_matches_any_name_within_document() {
        let store = ready_store(&["a.pdf", "b.pdf"]).await;
        let a = vec![
            chunk("a.pdf", 1, vec![1.0, 0.0], &["NASA"]),
            chunk("a.pdf", 2, vec![1.0, 0.0], &["ESA", "NASA"]),
            chunk("a.pdf", 3, vec![1.0, 0.0], &["JAXA"]),
        ];
        let b = vec![chunk("b.pdf", 1, vec![1.0, 0.0], &["NASA"])];
        store.write_chunks("a.pdf", &a, DuplicatePolicy::Append).await.expect("write a");
        store.write_chunks("b.pdf", &b, DuplicatePolicy::Append).await.expect("write b");

        let names = vec!["NASA".to_string(), "ESA".to_string()];
        let hits = store.entity_search(&names, "a.pdf").await.expect("search");
        let positions: Vec<u64> = hits.iter().map(|hit| hit.chunk.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert!(hits.iter().all(|hit| hit.score.is_none()));

        assert!(store.entity_search(&[], "a.pdf").await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn replace_policy_swaps_chunk_set() {
        let store = ready_store(&["a.pdf"]).await;
        let first = vec![
            chunk("a.pdf", 1, vec![1.0, 0.0], &[]),
            chunk("a.pdf", 2, vec![1.0, 0.0], &[]),
        ];
        let second = vec![chunk("a.pdf", 1, vec![0.0, 1.0], &[])];
        store.write_chunks("a.pdf", &first, DuplicatePolicy::Append).await.expect("write");
        store.write_chunks("a.pdf", &second, DuplicatePolicy::Replace).await.expect("replace");

        assert_eq!(store.chunks_for("a.pdf").await, second);
        assert!(store
            .write_chunks("a.pdf", &second, DuplicatePolicy::Reject)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn filenames_are_listed_in_order_without_duplicates() {
        let store = ready_store(&["zeta.pdf", "alpha.pdf", "zeta.pdf"]).await;
        assert_eq!(
            store.list_document_filenames().await.expect("list"),
            vec!["alpha.pdf".to_string(), "zeta.pdf".to_string()]
        );
    }
}
