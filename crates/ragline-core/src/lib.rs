//! Prompt templates, composable chains, routing, retrieval QA and LLM-graded evaluation.

pub mod chain;
pub mod config;
pub mod context;
pub mod eval;
pub mod parser;
pub mod prompt;
pub mod retrieval;
pub mod vault;

pub use chain::{
    BoxFuture, Chain, ChainError, ChainValues, ConversationBuffer, ConversationChain,
    Destination, LlmChain, RouteDecision, RouterChain, SequentialChain, SimpleSequentialChain,
    values,
};
pub use config::Config;
pub use context::{ChainObserver, RecordingObserver, RunContext, TraceEvent, TracingObserver};
pub use eval::{EvalError, EvalSummary, Evaluator, Example, GradedOutput, QaGenerator, Verdict};
pub use parser::{OutputParseError, ResponseSchema, StructuredOutputParser};
pub use prompt::{ChatPromptTemplate, PromptTemplate, TemplateError};
pub use retrieval::{QaAnswer, RetrievalQa};
