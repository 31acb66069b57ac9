pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod entities;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod rerank;
pub mod retriever;
pub mod stores;
pub mod synthesis;
#[cfg(test)]
mod testing;
pub mod traits;

pub use chunking::{chunk_pages, split_windows, ChunkingConfig};
pub use config::{
    LlmConfig, ModelEndpoints, Neo4jConfig, OcrConfig, ServiceConfig, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use context::RagContext;
pub use embeddings::{Embedder, FastEmbedder, HttpEmbedder};
pub use entities::{EntityExtractor, EntitySet};
pub use error::{ConfigError, IngestError, ModelError, SearchError, StartupError};
pub use extractor::{extract_page_texts, PageText, PdfExtractor};
pub use ingest::{
    discover_pdf_files, ingest_document, ingest_folder, ingest_pages, process_and_ingest,
    FolderReport, IngestionReport, SkippedPdf,
};
pub use llm::{GeminiModel, GenerationOptions, LanguageModel};
pub use models::{
    Answer, Candidate, Chunk, ChunkKey, Comparison, DocumentFingerprint, DuplicatePolicy,
    IngestionOptions, IngestionStage, QueryOptions, RankedChunk, RetrievalMode,
};
pub use orchestrator::{answer_question, compare, compare_pair, list_documents};
pub use rerank::{CrossEncoder, FastCrossEncoder, HttpCrossEncoder, Reranker};
pub use retriever::HybridRetriever;
pub use stores::{InMemoryStore, Neo4jStore};
pub use synthesis::AnswerSynthesizer;
pub use traits::{GraphStore, VECTOR_INDEX_NAME};
