use crate::embeddings::Embedder;
use crate::entities::EntityExtractor;
use crate::models::{Candidate, ChunkKey, QueryOptions, RetrievalMode};
use crate::traits::GraphStore;
use crate::SearchError;
use std::collections::HashMap;
use tracing::debug;

pub struct HybridRetriever<'a> {
    store: &'a dyn GraphStore,
    embedder: &'a dyn Embedder,
    entities: &'a EntityExtractor,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(
        store: &'a dyn GraphStore,
        embedder: &'a dyn Embedder,
        entities: &'a EntityExtractor,
    ) -> Self {
        Self {
            store,
            embedder,
            entities,
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        filename: &str,
        options: &QueryOptions,
    ) -> Result<Vec<Candidate>, SearchError> {
        let question_entities: Vec<String> = self
            .entities
            .extract_entities(question)
            .await
            .into_iter()
            .collect();

        let embedding = self.embedder.embed(question).await?;
        let vector_hits = self
            .store
            .vector_search(&embedding, options.vector_top_k, filename)
            .await?;
        let graph_hits = self.store.entity_search(&question_entities, filename).await?;

        debug!(
            %filename,
            entities = question_entities.len(),
            vector_hits = vector_hits.len(),
            graph_hits = graph_hits.len(),
            "hybrid retrieval"
        );

        Ok(merge_candidates(vector_hits, graph_hits, options.candidate_ceiling))
    }
}

pub fn merge_candidates(
    vector_hits: Vec<Candidate>,
    graph_hits: Vec<Candidate>,
    ceiling: usize,
) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::new();
    let mut seen: HashMap<ChunkKey, usize> = HashMap::new();

    for hit in vector_hits.into_iter().chain(graph_hits) {
        let key = hit.chunk.key();
        match seen.get(&key) {
            Some(&index) => {
                let existing = &mut merged[index];
                if existing.mode != hit.mode {
                    existing.mode = RetrievalMode::Both;
                }
                if existing.score.is_none() {
                    existing.score = hit.score;
                }
            }
            None => {
                seen.insert(key, merged.len());
                merged.push(hit);
            }
        }
    }

    merged.truncate(ceiling);
    merged
}
