//! Composable chains: named text inputs in, named text outputs out.

mod conversation;
mod llm;
mod router;
mod sequential;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

pub use conversation::{ConversationBuffer, ConversationChain};
pub use llm::LlmChain;
pub use router::{Destination, RouteDecision, RouterChain};
pub use sequential::{SequentialChain, SimpleSequentialChain};

use ragline_llm::LlmError;
use ragline_memory::IndexError;

use crate::context::RunContext;
use crate::parser::OutputParseError;
use crate::prompt::TemplateError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type ChainValues = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] OutputParseError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("chain {chain:?} is missing inputs: {}", .missing.join(", "))]
    MissingInputs { chain: String, missing: Vec<String> },

    #[error("chain {chain:?} did not produce outputs: {}", .missing.join(", "))]
    MissingOutputs { chain: String, missing: Vec<String> },

    #[error("step {step} ({chain:?}) requires {key:?}, which no earlier step or input provides")]
    UnresolvedInput {
        step: usize,
        chain: String,
        key: String,
    },

    #[error("invalid chain configuration: {0}")]
    InvalidConfiguration(String),

    #[error("step {index} ({name:?}) failed: {source}")]
    Step {
        index: usize,
        name: String,
        #[source]
        source: Box<ChainError>,
    },

    #[error("chain {chain:?} cancelled: {reason}")]
    Cancelled { chain: String, reason: String },
}

impl ChainError {
    pub(crate) fn cancelled(chain: &str, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            chain: chain.to_owned(),
            reason: reason.into(),
        }
    }

    /// Wrap a step failure with its position. Cancellation is passed through
    /// unchanged so a whole run reports one distinct cancelled error.
    pub(crate) fn at_step(self, index: usize, name: &str) -> Self {
        match self {
            Self::Cancelled { .. } => self,
            other => Self::Step {
                index,
                name: name.to_owned(),
                source: Box::new(other),
            },
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Step { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// A named transformation over [`ChainValues`].
///
/// Implementors provide [`Chain::execute`]. Callers use [`Chain::call`], which
/// checks declared inputs and outputs and reports to the run's observer.
pub trait Chain: Send + Sync {
    fn name(&self) -> &str;

    fn input_keys(&self) -> &[String];

    fn output_keys(&self) -> &[String];

    fn execute<'a>(
        &'a self,
        inputs: ChainValues,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<ChainValues, ChainError>>;

    fn call<'a>(
        &'a self,
        inputs: ChainValues,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<ChainValues, ChainError>> {
        Box::pin(async move {
            let name = self.name();
            let missing: Vec<String> = self
                .input_keys()
                .iter()
                .filter(|k| !inputs.contains_key(*k))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(ChainError::MissingInputs {
                    chain: name.to_owned(),
                    missing,
                });
            }

            ctx.observe(|o| o.on_chain_start(name, &inputs));
            let result = self.execute(inputs, ctx).await.and_then(|outputs| {
                let missing: Vec<String> = self
                    .output_keys()
                    .iter()
                    .filter(|k| !outputs.contains_key(*k))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    Ok(outputs)
                } else {
                    Err(ChainError::MissingOutputs {
                        chain: name.to_owned(),
                        missing,
                    })
                }
            });
            match &result {
                Ok(outputs) => {
                    ctx.observe(|o| o.on_chain_end(name, outputs));
                    tracing::debug!(chain = name, "chain finished");
                }
                Err(e) => {
                    ctx.observe(|o| o.on_chain_error(name, e));
                    tracing::debug!(chain = name, error = %e, "chain failed");
                }
            }
            result
        })
    }

    /// Run a chain with exactly one input and one output key on plain text.
    fn run<'a>(&'a self, input: &'a str, ctx: &'a RunContext) -> BoxFuture<'a, Result<String, ChainError>> {
        Box::pin(async move {
            let (Some(in_key), Some(out_key), 1, 1) = (
                self.input_keys().first(),
                self.output_keys().first(),
                self.input_keys().len(),
                self.output_keys().len(),
            ) else {
                return Err(ChainError::InvalidConfiguration(format!(
                    "chain {:?} must have exactly one input and one output key to run on text",
                    self.name()
                )));
            };
            let mut outputs = self
                .call(ChainValues::from([(in_key.clone(), input.to_owned())]), ctx)
                .await?;
            Ok(outputs.remove(out_key).unwrap_or_default())
        })
    }
}

/// Build [`ChainValues`] from string pairs.
pub fn values<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> ChainValues
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
