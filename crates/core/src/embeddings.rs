use crate::error::ModelError;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

pub const LOCAL_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ModelError::Response {
            model: "embedder".to_string(),
            details: "no vector returned for single input".to_string(),
        })
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    normalize: bool,
}

impl HttpEmbedder {
    pub async fn connect(base_url: &str, dimensions: usize) -> Result<Self, ModelError> {
        let embedder = Self {
            client: Client::new(),
            endpoint: format!("{}/embed", base_url.trim_end_matches('/')),
            dimensions,
        };

        let sample = embedder
            .embed_batch(&["dimension check".to_string()])
            .await
            .map_err(|error| ModelError::Unavailable(format!("{}: {error}", embedder.endpoint)))?;
        if sample.len() != 1 {
            return Err(ModelError::Unavailable(format!(
                "{} returned {} vectors for one input",
                embedder.endpoint,
                sample.len()
            )));
        }

        info!(endpoint = %embedder.endpoint, dimensions, "embedding model ready");
        Ok(embedder)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                inputs: texts,
                normalize: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ModelError::Response {
                model: self.endpoint.clone(),
                details: response.status().to_string(),
            });
        }

        let vectors: Vec<Vec<f32>> = response.json().await?;
        check_batch(vectors, texts.len(), self.dimensions, &self.endpoint)
    }
}

pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    dimensions: usize,
}

impl FastEmbedder {
    pub async fn load(cache_dir: Option<&Path>) -> Result<Self, ModelError> {
        let cache_dir = prepare_cache_dir(cache_dir).await?;

        let (model, dimensions) = tokio::task::spawn_blocking(move || {
            let mut options =
                InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
            if let Some(dir) = cache_dir {
                options = options.with_cache_dir(dir);
            }

            let mut model = TextEmbedding::try_new(options)
                .map_err(|error| ModelError::Unavailable(format!("{LOCAL_EMBEDDING_MODEL}: {error}")))?;
            let sample = model
                .embed(vec!["dimension check"], None)
                .map_err(|error| ModelError::Unavailable(format!("{LOCAL_EMBEDDING_MODEL}: {error}")))?;
            let dimensions = sample.first().map(Vec::len).ok_or_else(|| {
                ModelError::Unavailable(format!("{LOCAL_EMBEDDING_MODEL} returned no vector"))
            })?;
            Ok::<_, ModelError>((model, dimensions))
        })
        .await
        .map_err(task_failed)??;

        info!(model = LOCAL_EMBEDDING_MODEL, dimensions, "embedding model loaded");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let inputs = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| ModelError::Unavailable(format!("{LOCAL_EMBEDDING_MODEL} lock poisoned")))?;
            model.embed(inputs, None).map_err(|error| ModelError::Response {
                model: LOCAL_EMBEDDING_MODEL.to_string(),
                details: error.to_string(),
            })
        })
        .await
        .map_err(task_failed)??;

        check_batch(vectors, texts.len(), self.dimensions, LOCAL_EMBEDDING_MODEL)
    }
}

pub(crate) async fn prepare_cache_dir(cache_dir: Option<&Path>) -> Result<Option<PathBuf>, ModelError> {
    let Some(dir) = cache_dir else {
        return Ok(None);
    };
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|error| ModelError::Unavailable(format!("model cache {}: {error}", dir.display())))?;
    Ok(Some(dir.to_path_buf()))
}

pub(crate) fn task_failed(error: tokio::task::JoinError) -> ModelError {
    ModelError::Unavailable(format!("model task failed: {error}"))
}

fn check_batch(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dimensions: usize,
    model: &str,
) -> Result<Vec<Vec<f32>>, ModelError> {
    if vectors.len() != expected_count {
        return Err(ModelError::Response {
            model: model.to_string(),
            details: format!("expected {expected_count} vectors, got {}", vectors.len()),
        });
    }
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(ModelError::DimensionMismatch {
            expected: dimensions,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}
