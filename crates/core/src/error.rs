use crate::models::IngestionStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid url for {setting}: {source}")]
    InvalidUrl {
        setting: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid setting {setting}: {details}")]
    Invalid {
        setting: &'static str,
        details: String,
    },
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {model}: {details}")]
    Response { model: String, details: String },

    #[error("embedding dimension {actual} does not match expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store not available yet: {0}")]
    NotReady(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document already ingested: {0}")]
    DuplicateDocument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR fallback failed: {0}")]
    OcrFailed(String),

    #[error("store error: {0}")]
    Store(#[from] SearchError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("ingestion failed while {stage}: {source}")]
    Stage {
        stage: IngestionStage,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    pub fn at(self, stage: IngestionStage) -> Self {
        match self {
            already @ IngestError::Stage { .. } => already,
            other => IngestError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<IngestionStage> {
        match self {
            IngestError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn root(&self) -> &IngestError {
        match self {
            IngestError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store unreachable: {0}")]
    Store(#[from] SearchError),

    #[error("model failed to load: {0}")]
    Model(#[from] ModelError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
