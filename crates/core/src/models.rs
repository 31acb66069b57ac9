use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NO_RELEVANT_INFORMATION: &str =
    "I could not find any relevant information in the document to answer your question.";
pub const ANSWER_UNAVAILABLE: &str = "There was an error while generating the answer.";
pub const COMPARISON_UNAVAILABLE: &str = "There was an error while generating the comparison.";

pub fn topic_not_found_message(topic: &str) -> String {
    format!("I could not find any information about '{topic}' in either document.")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub filename: String,
    pub source_path: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub source: String,
    pub page_number: u32,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub source: String,
    pub page_number: u32,
    pub position: u64,
    pub text: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn new(source: impl Into<String>, page_number: u32, position: u64, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            page_number,
            position,
            text: text.into(),
            entities: Vec::new(),
            embedding: Vec::new(),
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            source: self.source.clone(),
            page_number: self.page_number,
            position: self.position,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RetrievalMode {
    Vector,
    Graph,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk: Chunk,
    pub score: Option<f64>,
    pub mode: RetrievalMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub rerank_score: f32,
    pub retrieval_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    Reject,
    #[default]
    Replace,
    Append,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            other => Err(format!("unknown duplicate policy '{other}' (reject|replace|append)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 150,
            duplicate_policy: DuplicatePolicy::Replace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub top_k: usize,
    pub candidate_ceiling: usize,
    pub vector_top_k: usize,
    pub vector_oversample: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            candidate_ceiling: 10,
            vector_top_k: 5,
            vector_oversample: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IngestionStage {
    Received,
    Parsed,
    Chunked,
    EntitiesExtracted,
    Embedded,
    Indexed,
    Ingested,
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IngestionStage::Received => "receiving",
            IngestionStage::Parsed => "parsing",
            IngestionStage::Chunked => "chunking",
            IngestionStage::EntitiesExtracted => "extracting entities",
            IngestionStage::Embedded => "embedding",
            IngestionStage::Indexed => "indexing",
            IngestionStage::Ingested => "finalizing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Answer {
    Grounded(String),
    NoRelevantInformation,
    Unavailable,
}

impl Answer {
    pub fn is_no_information(&self) -> bool {
        matches!(self, Answer::NoRelevantInformation)
    }

    pub fn text(&self) -> &str {
        match self {
            Answer::Grounded(text) => text,
            Answer::NoRelevantInformation => NO_RELEVANT_INFORMATION,
            Answer::Unavailable => ANSWER_UNAVAILABLE,
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Comparison {
    Summary(String),
    TopicNotFound(String),
    Unavailable,
}

impl Comparison {
    pub fn text(&self) -> String {
        match self {
            Comparison::Summary(text) => text.clone(),
            Comparison::TopicNotFound(topic) => topic_not_found_message(topic),
            Comparison::Unavailable => COMPARISON_UNAVAILABLE.to_string(),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
