use crate::error::ModelError;
use crate::llm::{GenerationOptions, LanguageModel};
use crate::models::RankedChunk;
use tracing::debug;

const COMPARISON_TEMPERATURE: f32 = 0.2;

pub fn format_context(chunks: &[RankedChunk]) -> String {
    chunks
        .iter()
        .map(|ranked| {
            format!(
                "Source (Page {}, Chunk {}):\n{}",
                ranked.chunk.page_number, ranked.chunk.position, ranked.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn answer_prompt(question: &str, context: &str) -> String {
    format!(
        "You are an expert assistant helping with document analysis.\n\
         Answer the question based only on the provided context and cite the source (page and chunk) of your answer.\n\
         If the context does not contain the answer, say you don't know rather than making something up.\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Answer:"
    )
}

pub fn comparison_prompt(
    topic: &str,
    first: (&str, &str),
    second: (&str, &str),
) -> String {
    let (first_name, first_answer) = first;
    let (second_name, second_answer) = second;
    format!(
        "You are a helpful summarization and analysis assistant.\n\
         Your task is to compare and contrast the information provided from two different documents about a specific topic.\n\
         Analyze the context from each document and provide a concise summary of the similarities and differences.\n\
         If information is only present in one document, state that clearly.\n\n\
         --- TOPIC OF COMPARISON ---\n{topic}\n\n\
         --- CONTEXT FROM: {first_name} ---\n{first_answer}\n\n\
         --- CONTEXT FROM: {second_name} ---\n{second_answer}\n\n\
         --- COMPARATIVE SUMMARY ---\n"
    )
}

pub struct AnswerSynthesizer<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> AnswerSynthesizer<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        ranked: &[RankedChunk],
        top_k: usize,
    ) -> Result<String, ModelError> {
        let selected = &ranked[..top_k.min(ranked.len())];
        let prompt = answer_prompt(question, &format_context(selected));
        debug!(chunks = selected.len(), prompt_chars = prompt.len(), "synthesizing answer");
        self.model.complete(&prompt, GenerationOptions::default()).await
    }

    pub async fn compare(
        &self,
        topic: &str,
        first: (&str, &str),
        second: (&str, &str),
    ) -> Result<String, ModelError> {
        let prompt = comparison_prompt(topic, first, second);
        self.model
            .complete(&prompt, GenerationOptions::with_temperature(COMPARISON_TEMPERATURE))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<(String, GenerationOptions)>>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, prompt: &str, options: GenerationOptions) -> Result<String, ModelError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push((prompt.to_string(), options));
            }
            Ok("answer".to_string())
        }
    }

    fn ranked(page: u32, position: u64, text: &str) -> RankedChunk {
        RankedChunk {
            chunk: Chunk::new("doc.pdf", page, position, text),
            rerank_score: 1.0,
            retrieval_score: None,
        }
    }

    #[test]
    fn context_carries_citations_in_rank_order() {
        let context = format_context(&[ranked(4, 9, "second best"), ranked(1, 2, "third")]);
        assert_eq!(
            context,
            "Source (Page 4, Chunk 9):\nsecond best\n\nSource (Page 1, Chunk 2):\nthird"
        );
    }

    #[test]
    fn answer_prompt_instructs_grounding_and_refusal() {
        let prompt = answer_prompt("What failed?", "ctx");
        assert!(prompt.contains("based only on the provided context"));
        assert!(prompt.contains("say you don't know"));
        assert!(prompt.contains("Question: What failed?"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[tokio::test]
    async fn only_top_k_chunks_reach_the_prompt() {
        let model = RecordingModel::default();
        let synthesizer = AnswerSynthesizer::new(&model);
        let chunks = vec![ranked(1, 1, "alpha"), ranked(1, 2, "beta"), ranked(1, 3, "gamma")];

        let answer = synthesizer.synthesize("q", &chunks, 2).await.expect("model answers");
        assert_eq!(answer, "answer");

        let prompts = model.prompts.lock().expect("lock");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.contains("alpha") && prompts[0].0.contains("beta"));
        assert!(!prompts[0].0.contains("gamma"));
    }

    #[tokio::test]
    async fn comparison_uses_low_temperature_and_both_contexts() {
        let model = RecordingModel::default();
        let synthesizer = AnswerSynthesizer::new(&model);
        synthesizer
            .compare("valves", ("a.pdf", "A says"), ("b.pdf", "B says"))
            .await
            .expect("model answers");

        let prompts = model.prompts.lock().expect("lock");
        let (prompt, options) = &prompts[0];
        assert!(prompt.contains("--- CONTEXT FROM: a.pdf ---\nA says"));
        assert!(prompt.contains("--- CONTEXT FROM: b.pdf ---\nB says"));
        assert_eq!(options.temperature, Some(COMPARISON_TEMPERATURE));
    }
}
