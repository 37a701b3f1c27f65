use std::sync::{Arc, Mutex};

use ragline_llm::{LlmProvider, Message};

use super::{BoxFuture, Chain, ChainError, ChainValues};
use crate::context::RunContext;

/// Past exchanges, oldest first. With a window, only the last `n` exchanges are
/// kept.
#[derive(Debug, Clone, Default)]
pub struct ConversationBuffer {
    exchanges: Vec<(String, String)>,
    window: Option<usize>,
}

impl ConversationBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn windowed(window: usize) -> Self {
        Self {
            exchanges: Vec::new(),
            window: Some(window),
        }
    }

    pub fn save(&mut self, input: impl Into<String>, output: impl Into<String>) {
        self.exchanges.push((input.into(), output.into()));
        if let Some(w) = self.window {
            let excess = self.exchanges.len().saturating_sub(w);
            self.exchanges.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Replayable history as alternating user/assistant messages.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.exchanges
            .iter()
            .flat_map(|(human, ai)| [Message::user(human.clone()), Message::assistant(ai.clone())])
            .collect()
    }

    /// History rendered as `Human:`/`AI:` lines.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.messages()
            .iter()
            .map(|m| {
                let who = if m.role == ragline_llm::Role::User {
                    "Human"
                } else {
                    "AI"
                };
                format!("{who}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Chat chain that replays the conversation so far into each completion call.
pub struct ConversationChain<P> {
    name: String,
    provider: Arc<P>,
    memory: Mutex<ConversationBuffer>,
    system_prompt: Option<String>,
    temperature: f32,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
}

impl<P> ConversationChain<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, memory: ConversationBuffer) -> Self {
        Self {
            name: "conversation_chain".into(),
            provider,
            memory: Mutex::new(memory),
            system_prompt: None,
            temperature: 0.0,
            input_keys: vec!["input".into()],
            output_keys: vec!["response".into()],
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Snapshot of the stored conversation.
    #[must_use]
    pub fn memory(&self) -> ConversationBuffer {
        self.memory.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.memory.lock() {
            m.clear();
        }
    }
}

impl<P: LlmProvider> Chain for ConversationChain<P> {
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
            let input = inputs.get(&self.input_keys[0]).cloned().unwrap_or_default();
            let mut messages = Vec::new();
            if let Some(sys) = &self.system_prompt {
                messages.push(Message::system(sys.clone()));
            }
            messages.extend(self.memory().messages());
            messages.push(Message::user(input.clone()));

            ctx.observe(|o| o.on_llm_start(&self.name, &messages));
            let response = ctx
                .guard(&self.name, async {
                    self.provider
                        .chat(&messages, self.temperature)
                        .await
                        .map_err(ChainError::Llm)
                })
                .await?;
            ctx.observe(|o| o.on_llm_end(&self.name, &response));

            if let Ok(mut memory) = self.memory.lock() {
                memory.save(input, response.clone());
            }
            Ok(ChainValues::from([(self.output_keys[0].clone(), response)]))
        })
    }
}
