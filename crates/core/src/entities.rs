use crate::error::ModelError;
use crate::llm::{GenerationOptions, LanguageModel};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};

pub type EntitySet = BTreeSet<String>;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("language model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("malformed entity list: {0}")]
    Malformed(String),
}

pub fn entity_prompt(text: &str) -> String {
    format!(
        "You are a helpful AI assistant for knowledge graph construction.\n\
         From the following text, extract the key entities (people, organizations, locations, technical concepts, projects).\n\
         Return the result as a JSON list of strings. Example: [\"NASA\", \"Aerojet Rocketdyne\", \"bipropellant valve\"]\n\n\
         --- TEXT ---\n{text}\n\n\
         --- ENTITIES (JSON List) ---\n"
    )
}

pub fn normalize_entity(name: &str) -> Option<String> {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn list_pattern() -> Result<&'static Regex, ExtractionError> {
    static LIST_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    LIST_PATTERN
        .get_or_init(|| Regex::new(r"(?s)\[.*\]"))
        .as_ref()
        .map_err(|error| ExtractionError::Malformed(error.to_string()))
}

pub fn parse_entity_list(raw: &str) -> Result<EntitySet, ExtractionError> {
    let cleaned = raw.trim().replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let value = match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => value,
        Err(direct_error) => {
            let embedded = list_pattern()?
                .find(cleaned)
                .ok_or_else(|| ExtractionError::Malformed(direct_error.to_string()))?;
            serde_json::from_str::<Value>(embedded.as_str())
                .map_err(|error| ExtractionError::Malformed(error.to_string()))?
        }
    };

    let items = value
        .as_array()
        .ok_or_else(|| ExtractionError::Malformed(format!("expected a JSON list, got {value}")))?;

    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .filter_map(normalize_entity)
        .collect())
}

pub struct EntityExtractor {
    model: Arc<dyn LanguageModel>,
}

impl EntityExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn try_extract(&self, text: &str) -> Result<EntitySet, ExtractionError> {
        let reply = self
            .model
            .complete(&entity_prompt(text), GenerationOptions::default())
            .await?;
        debug!(reply_chars = reply.len(), "entity extraction reply received");
        parse_entity_list(&reply)
    }

    pub async fn extract_entities(&self, text: &str) -> EntitySet {
        match self.try_extract(text).await {
            Ok(entities) => entities,
            Err(error) => {
                warn!(%error, "could not extract entities, continuing with none");
                EntitySet::new()
            }
        }
    }
}
