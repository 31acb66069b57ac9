use crate::config::{ModelEndpoints, OcrConfig, ServiceConfig};
use crate::embeddings::{Embedder, FastEmbedder, HttpEmbedder};
use crate::entities::EntityExtractor;
use crate::error::{ModelError, StartupError};
use crate::llm::{GeminiModel, LanguageModel};
use crate::models::{IngestionOptions, QueryOptions};
use crate::rerank::{CrossEncoder, FastCrossEncoder, HttpCrossEncoder, Reranker};
use crate::retriever::HybridRetriever;
use crate::stores::Neo4jStore;
use crate::synthesis::AnswerSynthesizer;
use crate::traits::GraphStore;
use std::sync::Arc;
use tracing::info;

pub struct RagContext {
    pub(crate) store: Arc<dyn GraphStore>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) llm: Arc<dyn LanguageModel>,
    pub(crate) entities: EntityExtractor,
    pub(crate) reranker: Reranker,
    pub(crate) ingestion: IngestionOptions,
    pub(crate) query: QueryOptions,
    pub(crate) ocr: Option<OcrConfig>,
}

impl RagContext {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        encoder: Arc<dyn CrossEncoder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            store,
            embedder,
            entities: EntityExtractor::new(Arc::clone(&llm)),
            llm,
            reranker: Reranker::new(encoder),
            ingestion: IngestionOptions::default(),
            query: QueryOptions::default(),
            ocr: None,
        }
    }

    pub fn with_ingestion_options(mut self, options: IngestionOptions) -> Self {
        self.ingestion = options;
        self
    }

    pub fn with_query_options(mut self, options: QueryOptions) -> Self {
        self.query = options;
        self
    }

    pub fn with_ocr(mut self, ocr: Option<OcrConfig>) -> Self {
        self.ocr = ocr;
        self
    }

    pub async fn connect(config: &ServiceConfig) -> Result<Self, StartupError> {
        config.validate()?;

        let (embedder, encoder) = load_models(&config.models).await?;

        let llm = GeminiModel::new(&config.llm)?;
        info!(model = %llm.model(), "language model configured");

        let store = Neo4jStore::new(&config.neo4j, config.models.embedding_dimension)?
            .with_vector_oversample(config.query.vector_oversample);
        store.verify_connectivity().await?;

        Ok(Self::new(Arc::new(store), embedder, encoder, Arc::new(llm))
            .with_ingestion_options(config.ingestion.clone())
            .with_query_options(config.query.clone())
            .with_ocr(config.ocr.clone()))
    }

    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    pub fn ingestion_options(&self) -> &IngestionOptions {
        &self.ingestion
    }

    pub fn query_options(&self) -> &QueryOptions {
        &self.query
    }

    pub(crate) fn retriever(&self) -> HybridRetriever<'_> {
        HybridRetriever::new(self.store.as_ref(), self.embedder.as_ref(), &self.entities)
    }

    pub(crate) fn synthesizer(&self) -> AnswerSynthesizer<'_> {
        AnswerSynthesizer::new(self.llm.as_ref())
    }
}

async fn load_models(
    models: &ModelEndpoints,
) -> Result<(Arc<dyn Embedder>, Arc<dyn CrossEncoder>), ModelError> {
    let cache_dir = models.model_cache_dir.as_deref();

    let embedder: Arc<dyn Embedder> = match &models.embedding_url {
        Some(url) => Arc::new(HttpEmbedder::connect(url, models.embedding_dimension).await?),
        None => Arc::new(FastEmbedder::load(cache_dir).await?),
    };
    if embedder.dimensions() != models.embedding_dimension {
        return Err(ModelError::DimensionMismatch {
            expected: models.embedding_dimension,
            actual: embedder.dimensions(),
        });
    }

    let encoder: Arc<dyn CrossEncoder> = match &models.reranker_url {
        Some(url) => Arc::new(HttpCrossEncoder::connect(url).await?),
        None => Arc::new(FastCrossEncoder::load(cache_dir).await?),
    };

    Ok((embedder, encoder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn complete() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.neo4j.password = Some("secret".to_string());
        config.llm.api_key = Some("key".to_string());
        config
    }

    #[tokio::test]
    async fn unreachable_embedding_server_is_fatal() {
        let mut config = complete();
        config.models.embedding_url = Some("http://127.0.0.1:9".to_string());

        let result = RagContext::connect(&config).await;
        assert!(matches!(result, Err(StartupError::Model(ModelError::Unavailable(_)))));
    }

    #[tokio::test]
    async fn failed_local_model_load_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let occupied = NamedTempFile::new()?;
        let mut config = complete();
        config.models.model_cache_dir = Some(occupied.path().to_path_buf());

        let result = RagContext::connect(&config).await;
        assert!(matches!(result, Err(StartupError::Model(ModelError::Unavailable(_)))));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_config_is_fatal_before_any_model_loads() {
        let mut config = complete();
        config.llm.api_key = None;
        assert!(matches!(RagContext::connect(&config).await, Err(StartupError::Config(_))));
    }
}
