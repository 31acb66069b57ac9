use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use crate::models::{IngestionOptions, QueryOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_LLM_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            username: "neo4j".to_string(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoints {
    pub embedding_url: Option<String>,
    pub reranker_url: Option<String>,
    pub embedding_dimension: usize,
    pub model_cache_dir: Option<PathBuf>,
}

impl Default for ModelEndpoints {
    fn default() -> Self {
        Self {
            embedding_url: None,
            reranker_url: None,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSIONS,
            model_cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub neo4j: Neo4jConfig,
    pub llm: LlmConfig,
    pub models: ModelEndpoints,
    pub ocr: Option<OcrConfig>,
    pub ingestion: IngestionOptions,
    pub query: QueryOptions,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url("neo4j.uri", &self.neo4j.uri)?;
        if self.neo4j.database.trim().is_empty() {
            return Err(ConfigError::Missing("NEO4J_DATABASE"));
        }
        require_secret("NEO4J_PASSWORD", self.neo4j.password.as_deref())?;

        require_secret("GEMINI_API_KEY", self.llm.api_key.as_deref())?;
        parse_url("llm.base_url", &self.llm.base_url)?;
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Missing("LLM_MODEL"));
        }

        if let Some(embedding_url) = &self.models.embedding_url {
            parse_url("models.embedding_url", embedding_url)?;
        }
        if let Some(reranker_url) = &self.models.reranker_url {
            parse_url("models.reranker_url", reranker_url)?;
        }
        if self.models.embedding_dimension == 0 {
            return Err(ConfigError::Invalid {
                setting: "models.embedding_dimension",
                details: "must be greater than zero".to_string(),
            });
        }

        ChunkingConfig::from(&self.ingestion)
            .validate()
            .map_err(|error| ConfigError::Invalid {
                setting: "ingestion",
                details: error.to_string(),
            })?;

        validate_query_options(&self.query)
    }
}

pub fn validate_query_options(options: &QueryOptions) -> Result<(), ConfigError> {
    let positive = [
        ("query.top_k", options.top_k),
        ("query.candidate_ceiling", options.candidate_ceiling),
        ("query.vector_top_k", options.vector_top_k),
        ("query.vector_oversample", options.vector_oversample),
    ];
    for (setting, value) in positive {
        if value == 0 {
            return Err(ConfigError::Invalid {
                setting,
                details: "must be greater than zero".to_string(),
            });
        }
    }
    Ok(())
}

pub fn parse_url(setting: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { setting, source })
}

fn require_secret(setting: &'static str, value: Option<&str>) -> Result<(), ConfigError> {
    match value.map(str::trim) {
        Some(secret) if !secret.is_empty() => Ok(()),
        _ => Err(ConfigError::Missing(setting)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.neo4j.password = Some("secret".to_string());
        config.llm.api_key = Some("key".to_string());
        config
    }

    #[test]
    fn complete_config_is_valid() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn missing_credentials_are_reported() {
        let mut config = complete();
        config.neo4j.password = Some("   ".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Missing("NEO4J_PASSWORD"))));

        let mut config = complete();
        config.llm.api_key = None;
        assert!(matches!(config.validate(), Err(ConfigError::Missing("GEMINI_API_KEY"))));
    }

    #[test]
    fn bad_urls_and_options_are_rejected() {
        let mut config = complete();
        config.models.embedding_url = Some("not a url".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl { .. })));

        let mut config = complete();
        config.ingestion.chunk_overlap = config.ingestion.chunk_size;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { setting: "ingestion", .. })));

        let mut config = complete();
        config.query.candidate_ceiling = 0;
        assert!(config.validate().is_err());
    }
}
