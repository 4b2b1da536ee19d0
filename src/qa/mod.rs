//! Retrieval-augmented question answering over a user's mail collection.
//!
//! The chain embeds the question, pulls the top chunks from the user's
//! collection (cosine + MMR), and hands question + excerpts to the chat
//! provider in one round trip. An empty collection is surfaced as a
//! distinct outcome instead of letting the model answer ungrounded.

use serde::Serialize;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::error::AppError;
use crate::index::store::{ScoredChunk, VectorStore, collection_name};
use crate::llm::LlmProvider;
use crate::llm::embeddings::Embedder;
use crate::text::truncate_chars;

/// Bound on the source snippets echoed back to the caller.
const PREVIEW_CHARS: usize = 300;

const SYSTEM_PROMPT: &str = "You are an assistant answering questions about the user's own \
mailbox. Answer using only the email excerpts provided. If the excerpts do not contain the \
answer, say so plainly instead of guessing.";

#[derive(Debug, Clone, Serialize)]
pub struct AskAnswer {
    pub answer: String,
    pub sources: Vec<SourceSnippet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSnippet {
    pub subject: String,
    pub from: String,
    pub preview: String,
}

/// Outcome of an ask: either a grounded answer, or nothing indexed yet.
#[derive(Debug)]
pub enum QaOutcome {
    Answer(AskAnswer),
    NoIndexedMail,
}

pub struct QaChain {
    store: VectorStore,
    embedder: Embedder,
    llm: LlmProvider,
    retrieval: RetrievalConfig,
}

impl QaChain {
    pub fn new(
        store: VectorStore,
        embedder: Embedder,
        llm: LlmProvider,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            retrieval,
        }
    }

    pub async fn answer(&self, user_id: i64, question: &str) -> Result<QaOutcome, AppError> {
        let collection = collection_name(user_id);
        if self.store.is_empty(&collection)? {
            return Ok(QaOutcome::NoIndexedMail);
        }

        let question_batch = [question.to_string()];
        let query = self
            .embedder
            .embed(&question_batch)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let hits = self.store.search(
            &collection,
            &query,
            self.retrieval.top_k,
            self.retrieval.candidate_pool,
            self.retrieval.mmr_lambda,
        )?;

        if hits.is_empty() {
            return Ok(QaOutcome::NoIndexedMail);
        }

        debug!(%collection, retrieved = hits.len(), "retrieved context for question");

        let prompt = build_prompt(question, &hits);
        let response = self.llm.complete(&prompt, Some(SYSTEM_PROMPT)).await?;
        if let Some(usage) = &response.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "llm usage"
            );
        }

        let sources = hits
            .iter()
            .map(|hit| SourceSnippet {
                subject: hit.chunk.metadata.subject.clone(),
                from: hit.chunk.metadata.from.clone(),
                preview: truncate_chars(&hit.chunk.text, PREVIEW_CHARS),
            })
            .collect();

        Ok(QaOutcome::Answer(AskAnswer {
            answer: response.text,
            sources,
        }))
    }
}

fn build_prompt(question: &str, hits: &[ScoredChunk]) -> String {
    let mut prompt = String::from("Email excerpts:\n");
    for (i, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!("\n[{}] {}\n", i + 1, hit.chunk.text));
    }
    prompt.push_str(&format!("\nQuestion: {question}"));
    prompt
}
