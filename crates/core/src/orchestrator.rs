use crate::context::RagContext;
use crate::models::{Answer, Comparison};
use crate::SearchError;
use tracing::{debug, info, info_span, warn, Instrument};

/// An empty retrieval returns [`Answer::NoRelevantInformation`] without calling
/// the model. A failed generation becomes [`Answer::Unavailable`].
pub async fn answer_question(
    ctx: &RagContext,
    question: &str,
    filename: &str,
    top_k: Option<usize>,
) -> Result<Answer, SearchError> {
    if question.trim().is_empty() {
        return Err(SearchError::Request("question is empty".to_string()));
    }
    let top_k = top_k.unwrap_or(ctx.query.top_k);
    if top_k == 0 {
        return Err(SearchError::Request("top_k must be greater than zero".to_string()));
    }

    let span = info_span!("answer", %filename, top_k);
    async move {
        let candidates = ctx.retriever().retrieve(question, filename, &ctx.query).await?;
        if candidates.is_empty() {
            info!("no candidate chunks, skipping generation");
            return Ok(Answer::NoRelevantInformation);
        }

        let ranked = ctx.reranker.rerank(question, candidates).await?;
        debug!(ranked = ranked.len(), "candidates re-ranked");

        match ctx.synthesizer().synthesize(question, &ranked, top_k).await {
            Ok(text) => Ok(Answer::Grounded(text)),
            Err(error) => {
                warn!(%error, "answer generation failed");
                Ok(Answer::Unavailable)
            }
        }
    }
    .instrument(span)
    .await
}

pub async fn compare(ctx: &RagContext, filenames: &[String], topic: &str) -> Result<Comparison, SearchError> {
    match filenames {
        [first, second] => compare_pair(ctx, first, second, topic).await,
        other => Err(SearchError::Request(format!(
            "comparison needs exactly two documents, got {}",
            other.len()
        ))),
    }
}

pub async fn compare_pair(
    ctx: &RagContext,
    first: &str,
    second: &str,
    topic: &str,
) -> Result<Comparison, SearchError> {
    let span = info_span!("compare", %first, %second);
    async move {
        let first_answer = answer_question(ctx, topic, first, None).await?;
        let second_answer = answer_question(ctx, topic, second, None).await?;

        if first_answer.is_no_information() && second_answer.is_no_information() {
            info!(%topic, "topic absent from both documents");
            return Ok(Comparison::TopicNotFound(topic.to_string()));
        }

        match ctx
            .synthesizer()
            .compare(
                topic,
                (first, first_answer.text()),
                (second, second_answer.text()),
            )
            .await
        {
            Ok(summary) => Ok(Comparison::Summary(summary)),
            Err(error) => {
                warn!(%error, "comparison generation failed");
                Ok(Comparison::Unavailable)
            }
        }
    }
    .instrument(span)
    .await
}

pub async fn list_documents(ctx: &RagContext) -> Result<Vec<String>, SearchError> {
    ctx.store.list_document_filenames().await
}
