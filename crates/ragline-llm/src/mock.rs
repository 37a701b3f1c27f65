//! Scripted offline provider for tests and the CLI `--mock` mode.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{LlmProvider, Message};

/// One recorded `chat` call.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<MockRequest>>>,
    pub default_response: String,
    pub embedding: Vec<f32>,
    pub supports_embeddings: bool,
    /// When set, `embed` returns a deterministic bag-of-words vector of this size.
    pub hashed_dimensions: Option<usize>,
    pub fail_chat: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            embedding: vec![0.0; 8],
            supports_embeddings: false,
            hashed_dimensions: None,
            fail_chat: false,
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            fail_embed: true,
            supports_embeddings: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_hashed_embeddings(mut self, dimensions: usize) -> Self {
        self.supports_embeddings = true;
        self.hashed_dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    /// Every `chat` call received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Feature-hashed bag of words: each lowercase alphanumeric token adds ±1 to one bucket.
fn hashed_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimensions.max(1)];
    let tokens = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase);
    for token in tokens {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&bytes[..8]);
        #[expect(clippy::cast_possible_truncation)]
        let idx = (u64::from_le_bytes(idx_bytes) % v.len() as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    v
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(MockRequest {
            messages: messages.to_vec(),
            temperature,
        });
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.fail_chat {
            return Err(LlmError::ServiceUnavailable {
                provider: "mock",
                status: 503,
            });
        }
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.default_response.clone()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported { provider: "mock" });
        }
        if self.fail_embed {
            return Err(LlmError::Other("mock embed error".into()));
        }
        Ok(match self.hashed_dimensions {
            Some(dims) => hashed_embedding(text, dims),
            None => self.embedding.clone(),
        })
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
