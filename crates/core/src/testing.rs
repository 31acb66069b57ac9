use crate::embeddings::Embedder;
use crate::error::ModelError;
use crate::rerank::CrossEncoder;
use async_trait::async_trait;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for byte in window.iter().collect::<String>().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOverlapScorer;

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl CrossEncoder for LexicalOverlapScorer {
    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>, ModelError> {
        let question_terms = terms(question);
        if question_terms.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }

        Ok(passages
            .iter()
            .map(|passage| {
                let passage_terms = terms(passage);
                let shared = question_terms.intersection(&passage_terms).count();
                shared as f32 / question_terms.len() as f32
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_sized() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let batch = embedder.embed_batch(&texts).await.expect("embeds");

        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|vector| vector.len() == 32));
        assert_eq!(batch[1], embedder.embed_text("gamma delta"));
        assert!(cosine_similarity(&batch[0], &embedder.embed_text("alpha beta")) > 0.9999);
    }
}
