use std::sync::Arc;

use ragline_llm::LlmProvider;

use super::{BoxFuture, Chain, ChainError, ChainValues};
use crate::context::RunContext;
use crate::prompt::ChatPromptTemplate;

/// Format a prompt, send it to the model, store the raw completion under one key.
pub struct LlmChain<P> {
    name: String,
    prompt: ChatPromptTemplate,
    provider: Arc<P>,
    temperature: f32,
    output_keys: Vec<String>,
}

impl<P> LlmChain<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, prompt: impl Into<ChatPromptTemplate>) -> Self {
        Self {
            name: "llm_chain".into(),
            prompt: prompt.into(),
            provider,
            temperature: 0.0,
            output_keys: vec!["text".into()],
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_keys = vec![key.into()];
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn prompt(&self) -> &ChatPromptTemplate {
        &self.prompt
    }
}

impl<P: LlmProvider> Chain for LlmChain<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> &[String] {
        self.prompt.input_variables()
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
            let messages = self.prompt.format(&inputs)?;
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
            tracing::debug!(
                chain = %self.name,
                provider = self.provider.name(),
                response_len = response.len(),
                "completion received"
            );
            Ok(ChainValues::from([(self.output_keys[0].clone(), response)]))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ragline_llm::Role;
    use ragline_llm::mock::MockProvider;

    use super::*;
    use crate::chain::values;
    use crate::prompt::PromptTemplate;

    fn prompt(t: &str) -> PromptTemplate {
        PromptTemplate::new(t).unwrap()
    }

    #[tokio::test]
    async fn formats_prompt_and_stores_completion() {
        let provider = Arc::new(MockProvider::with_responses(vec!["Royal Linen Co.".into()]));
        let chain = LlmChain::new(
            provider.clone(),
            prompt("Best name for a company that makes {product}?"),
        )
        .with_temperature(0.9);

        let out = chain
            .call(values([("product", "Queen Size Sheet Set")]), &RunContext::new())
            .await
            .unwrap();
        assert_eq!(out["text"], "Royal Linen Co.");

        let req = &provider.requests()[0];
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(
            req.messages[0].content,
            "Best name for a company that makes Queen Size Sheet Set?"
        );
        assert!((req.temperature - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn input_keys_follow_prompt() {
        let chain = LlmChain::new(Arc::new(MockProvider::default()), prompt("{a} {b}"))
            .with_output_key("c");
        assert_eq!(chain.input_keys(), ["a", "b"]);
        assert_eq!(chain.output_keys(), ["c"]);
    }

    #[tokio::test]
    async fn provider_error_surfaces() {
        let chain = LlmChain::new(Arc::new(MockProvider::failing()), prompt("{x}"));
        let err = chain
            .call(values([("x", "1")]), &RunContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Llm(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_completion_times_out() {
        let provider = Arc::new(MockProvider::default().with_delay(5_000));
        let chain = LlmChain::new(provider, prompt("{x}"));
        let ctx = RunContext::new().with_timeout(Duration::from_millis(100));
        let err = chain.call(values([("x", "1")]), &ctx).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
