//! Completion and embedding clients for hosted language-model APIs.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;

pub use error::LlmError;
pub use provider::{LlmProvider, Message, Role};
