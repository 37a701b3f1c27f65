//! Question answering grounded on retrieved chunks.

use std::fmt::Write as _;
use std::sync::Arc;

use ragline_llm::{LlmProvider, Message};
use ragline_memory::{ScoredChunk, VectorIndex};

use crate::chain::{BoxFuture, Chain, ChainError, ChainValues};
use crate::context::RunContext;

/// Line placed between context chunks. Stripped from chunk text before use.
pub const CHUNK_SEPARATOR: &str = "<<<END OF CHUNK>>>";

const SYSTEM_INSTRUCTION: &str = "\
Answer the user's question using only the context below. If the context does \
not contain the answer, say that you don't know. Do not make up an answer.
Context chunks are separated by a line reading <<<END OF CHUNK>>>.

CONTEXT:
";

/// Answer plus the chunks it was grounded on, best match first.
#[derive(Debug, Clone)]
pub struct QaAnswer {
    pub answer: String,
    pub sources: Vec<ScoredChunk>,
}

pub struct RetrievalQa<P, E = P> {
    name: String,
    index: Arc<VectorIndex<E>>,
    provider: Arc<P>,
    k: usize,
    temperature: f32,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
}

/// Join chunk texts with [`CHUNK_SEPARATOR`] lines.
#[must_use]
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (i, scored) in chunks.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, "\n{CHUNK_SEPARATOR}\n");
        }
        out.push_str(scored.chunk.content.replace(CHUNK_SEPARATOR, "").trim());
    }
    out
}

impl<P: LlmProvider, E: LlmProvider> RetrievalQa<P, E> {
    #[must_use]
    pub fn new(index: Arc<VectorIndex<E>>, provider: Arc<P>, k: usize) -> Self {
        Self {
            name: "retrieval_qa".into(),
            index,
            provider,
            k,
            temperature: 0.0,
            input_keys: vec!["query".into()],
            output_keys: vec!["result".into()],
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn index(&self) -> &VectorIndex<E> {
        &self.index
    }

    /// System message with instruction and context, then the question as the user turn.
    #[must_use]
    pub fn build_messages(question: &str, chunks: &[ScoredChunk]) -> Vec<Message> {
        let mut system = String::from(SYSTEM_INSTRUCTION);
        system.push_str(&build_context(chunks));
        vec![Message::system(system), Message::user(question)]
    }

    /// # Errors
    ///
    /// Returns [`ChainError::Index`] if retrieval fails, [`ChainError::Llm`] if the
    /// completion fails and [`ChainError::Cancelled`] on cancellation or timeout.
    pub async fn answer_with_sources(
        &self,
        question: &str,
        ctx: &RunContext,
    ) -> Result<QaAnswer, ChainError> {
        let sources = ctx
            .guard(&self.name, async {
                self.index
                    .query(question, self.k)
                    .await
                    .map_err(ChainError::Index)
            })
            .await?;
        if sources.is_empty() {
            tracing::info!(chain = %self.name, "no context retrieved, answering without it");
        }
        tracing::debug!(
            chain = %self.name,
            chunk_count = sources.len(),
            top_score = sources.first().map(|s| s.score),
            "context retrieved"
        );

        let messages = Self::build_messages(question, &sources);
        ctx.observe(|o| o.on_llm_start(&self.name, &messages));
        let answer = ctx
            .guard(&self.name, async {
                self.provider
                    .chat(&messages, self.temperature)
                    .await
                    .map_err(ChainError::Llm)
            })
            .await?;
        ctx.observe(|o| o.on_llm_end(&self.name, &answer));
        Ok(QaAnswer { answer, sources })
    }

    /// The model's reply, returned unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`RetrievalQa::answer_with_sources`].
    pub async fn answer(&self, question: &str, ctx: &RunContext) -> Result<String, ChainError> {
        Ok(self.answer_with_sources(question, ctx).await?.answer)
    }
}

impl<P: LlmProvider, E: LlmProvider> Chain for RetrievalQa<P, E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    fn execute<'a>(
        &'a self,
        inputs: ChainValues,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<ChainValues, ChainError>> {
        Box::pin(async move {
            let question = inputs.get(&self.input_keys[0]).map_or("", String::as_str);
            let answer = self.answer(question, ctx).await?;
            Ok(ChainValues::from([(self.output_keys[0].clone(), answer)]))
        })
    }
}
