use crate::embeddings::{prepare_cache_dir, task_failed};
use crate::error::ModelError;
use crate::models::{Candidate, RankedChunk};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const LOCAL_RERANK_MODEL: &str = "bge-reranker-base";

#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>, ModelError>;
}

#[derive(Debug, Clone)]
pub struct HttpCrossEncoder {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    raw_scores: bool,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub async fn connect(base_url: &str) -> Result<Self, ModelError> {
        let encoder = Self {
            client: Client::new(),
            endpoint: format!("{}/rerank", base_url.trim_end_matches('/')),
        };

        encoder
            .score("warmup", &["warmup passage".to_string()])
            .await
            .map_err(|error| ModelError::Unavailable(format!("{}: {error}", encoder.endpoint)))?;

        info!(endpoint = %encoder.endpoint, "re-ranking model ready");
        Ok(encoder)
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>, ModelError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&RerankRequest {
                query: question,
                texts: passages,
                raw_scores: true,
                truncate: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ModelError::Response {
                model: self.endpoint.clone(),
                details: response.status().to_string(),
            });
        }

        let hits: Vec<RerankHit> = response.json().await?;
        scores_by_index(hits, passages.len(), &self.endpoint)
    }
}

fn scores_by_index(hits: Vec<RerankHit>, expected: usize, model: &str) -> Result<Vec<f32>, ModelError> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for hit in hits {
        let slot = scores.get_mut(hit.index).ok_or_else(|| ModelError::Response {
            model: model.to_string(),
            details: format!("score for unknown passage index {}", hit.index),
        })?;
        *slot = Some(hit.score);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(index, score)| {
            score.ok_or_else(|| ModelError::Response {
                model: model.to_string(),
                details: format!("no score for passage {index}"),
            })
        })
        .collect()
}

pub struct FastCrossEncoder {
    model: Arc<Mutex<TextRerank>>,
}

impl FastCrossEncoder {
    pub async fn load(cache_dir: Option<&Path>) -> Result<Self, ModelError> {
        let cache_dir = prepare_cache_dir(cache_dir).await?;

        let model = tokio::task::spawn_blocking(move || {
            let mut options =
                RerankInitOptions::new(RerankerModel::BGERerankerBase).with_show_download_progress(false);
            if let Some(dir) = cache_dir {
                options = options.with_cache_dir(dir);
            }

            let mut model = TextRerank::try_new(options)
                .map_err(|error| ModelError::Unavailable(format!("{LOCAL_RERANK_MODEL}: {error}")))?;
            model
                .rerank("warmup", vec!["warmup passage"], false, None)
                .map_err(|error| ModelError::Unavailable(format!("{LOCAL_RERANK_MODEL}: {error}")))?;
            Ok::<_, ModelError>(model)
        })
        .await
        .map_err(task_failed)??;

        info!(model = LOCAL_RERANK_MODEL, "re-ranking model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl CrossEncoder for FastCrossEncoder {
    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>, ModelError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let question = question.to_string();
        let inputs = passages.to_vec();
        let results = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| ModelError::Unavailable(format!("{LOCAL_RERANK_MODEL} lock poisoned")))?;
            let documents: Vec<&str> = inputs.iter().map(String::as_str).collect();
            model
                .rerank(question.as_str(), documents, false, None)
                .map_err(|error| ModelError::Response {
                    model: LOCAL_RERANK_MODEL.to_string(),
                    details: error.to_string(),
                })
        })
        .await
        .map_err(task_failed)??;

        let hits = results
            .into_iter()
            .map(|result| RerankHit {
                index: result.index,
                score: result.score,
            })
            .collect();
        scores_by_index(hits, passages.len(), LOCAL_RERANK_MODEL)
    }
}

pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self { encoder }
    }

    /// Sorts by descending cross-encoder score. Ties keep candidate order.
    pub async fn rerank(
        &self,
        question: &str,
        candidates: Vec<Candidate>,
    ) -> Result<Vec<RankedChunk>, ModelError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let passages: Vec<String> = candidates
            .iter()
            .map(|candidate| candidate.chunk.text.clone())
            .collect();
        let scores = self.encoder.score(question, &passages).await?;
        if scores.len() != candidates.len() {
            return Err(ModelError::Response {
                model: "cross-encoder".to_string(),
                details: format!("{} scores for {} candidates", scores.len(), candidates.len()),
            });
        }

        let mut ranked: Vec<RankedChunk> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| RankedChunk {
                chunk: candidate.chunk,
                rerank_score: if score.is_nan() { f32::NEG_INFINITY } else { score },
                retrieval_score: candidate.score,
            })
            .collect();

        ranked.sort_by(|left, right| right.rerank_score.total_cmp(&left.rerank_score));

        debug!(
            candidates = ranked.len(),
            best = ranked.first().map(|hit| hit.rerank_score),
            "re-ranked candidates"
        );
        Ok(ranked)
    }
}
