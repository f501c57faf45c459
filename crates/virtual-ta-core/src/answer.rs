//! Grounded answer pipeline.
//!
//! [`Orchestrator::answer`] runs one question through
//! compose → embed → rank (per partition) → assemble → prompt → model →
//! parse → citation check. It holds no per-request state; the chunk store
//! snapshot is passed in by the caller.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use crate::context::{assemble, AssembleParams, AssembledContext};
use crate::embedding::{embed_query, Embedder};
use crate::error::{EmbeddingError, QueryError, UpstreamError};
use crate::models::{AnswerResponse, SourceType};
use crate::prompt::{
    build_prompt, compose_query, enforce_citations, parse_response, CitationPolicy, Prompt,
};
use crate::rank::{rank_partitions, RankParams};
use crate::store::ChunkStore;

/// Returned without calling the model when nothing relevant was retrieved.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant content in the course materials or forum to answer this question.";

/// The external language-model capability: prompt in, text out.
///
/// Implementations own any retry policy; the orchestrator calls
/// [`complete`](LanguageModel::complete) exactly once per question.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError>;
}

/// Pipeline tuning, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct AnswerSettings {
    pub rank: RankParams,
    pub assemble: AssembleParams,
    pub citation_policy: CitationPolicy,
    /// Query text beyond this many chars is truncated before embedding.
    pub max_input_chars: usize,
}

/// Output of the retrieval half of the pipeline.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Question plus any image text, exactly as embedded and prompted.
    pub query: String,
    pub context: AssembledContext,
}

/// Stateless per-call answer pipeline over injected collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    settings: AnswerSettings,
}

impl Orchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            embedder,
            llm,
            settings,
        }
    }

    /// Embed, rank, and assemble context for a question.
    pub async fn retrieve(
        &self,
        store: &ChunkStore,
        question: &str,
        image_text: Option<&str>,
    ) -> Result<Retrieval, QueryError> {
        retrieve(self.embedder.as_ref(), &self.settings, store, question, image_text).await
    }

    /// Answer a question from the store, with verified citations.
    ///
    /// # Errors
    ///
    /// Any [`QueryError`]; no partial answer is ever returned.
    pub async fn answer(
        &self,
        store: &ChunkStore,
        question: &str,
        image_text: Option<&str>,
    ) -> Result<AnswerResponse, QueryError> {
        let retrieval = self.retrieve(store, question, image_text).await?;

        if retrieval.context.is_empty() {
            tracing::warn!("no relevant content found for query");
            return Ok(AnswerResponse {
                answer: NO_CONTEXT_ANSWER.to_string(),
                links: Vec::new(),
            });
        }

        let prompt = build_prompt(&retrieval.query, &retrieval.context);

        let started = Instant::now();
        let raw = self.llm.complete(&prompt).await?;
        tracing::info!(
            model = self.llm.model_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            response_chars = raw.chars().count(),
            "language model responded"
        );

        let parsed = parse_response(&raw)?;
        let response =
            enforce_citations(parsed, &retrieval.context, self.settings.citation_policy)?;
        Ok(response)
    }
}

/// The retrieval half of the pipeline: compose, embed, rank, assemble.
///
/// Needs no language model, so retrieval-only callers can use it directly.
pub async fn retrieve(
    embedder: &dyn Embedder,
    settings: &AnswerSettings,
    store: &ChunkStore,
    question: &str,
    image_text: Option<&str>,
) -> Result<Retrieval, QueryError> {
    if question.trim().is_empty() {
        return Err(QueryError::InvalidQuestion);
    }
    let query = compose_query(question, image_text);

    let started = Instant::now();
    let vector = embed_query(embedder, &query, settings.max_input_chars).await?;
    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "query embedded");

    if let Some(dims) = store.dims() {
        if vector.len() != dims {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dims,
                found: vector.len(),
            }
            .into());
        }
    }

    let ranked = rank_partitions(&vector, store, &settings.rank);
    tracing::info!(
        course_hits = ranked.course.len(),
        forum_hits = ranked.forum.len(),
        threshold = settings.rank.threshold,
        "ranked chunks"
    );

    let context = assemble(&ranked.course, &ranked.forum, &settings.assemble);
    tracing::info!(
        course = context.count(SourceType::Course),
        forum = context.count(SourceType::Forum),
        dropped = context.dropped,
        chars = context.total_chars,
        "assembled context"
    );

    Ok(Retrieval { query, context })
}
