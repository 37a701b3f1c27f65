//! Per-run context passed through every chain call.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ragline_llm::Message;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainError, ChainValues, RouteDecision};

/// Receives chain lifecycle events for one run. All hooks default to no-ops.
pub trait ChainObserver: Send + Sync {
    fn on_chain_start(&self, _chain: &str, _inputs: &ChainValues) {}
    fn on_chain_end(&self, _chain: &str, _outputs: &ChainValues) {}
    fn on_chain_error(&self, _chain: &str, _error: &ChainError) {}
    fn on_llm_start(&self, _chain: &str, _messages: &[Message]) {}
    fn on_llm_end(&self, _chain: &str, _response: &str) {}
    fn on_route(&self, _chain: &str, _decision: &RouteDecision) {}
}

/// Forwards events to `tracing` at debug level, including prompt and response text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ChainObserver for TracingObserver {
    fn on_chain_start(&self, chain: &str, inputs: &ChainValues) {
        tracing::debug!(chain, ?inputs, "chain start");
    }

    fn on_chain_end(&self, chain: &str, outputs: &ChainValues) {
        tracing::debug!(chain, ?outputs, "chain end");
    }

    fn on_chain_error(&self, chain: &str, error: &ChainError) {
        tracing::debug!(chain, %error, "chain error");
    }

    fn on_llm_start(&self, chain: &str, messages: &[Message]) {
        for m in messages {
            tracing::debug!(chain, role = %m.role, content = %m.content, "llm prompt");
        }
    }

    fn on_llm_end(&self, chain: &str, response: &str) {
        tracing::debug!(chain, response, "llm response");
    }

    fn on_route(&self, chain: &str, decision: &RouteDecision) {
        tracing::debug!(chain, ?decision, "route decision");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    ChainStart { chain: String, inputs: ChainValues },
    ChainEnd { chain: String, outputs: ChainValues },
    ChainError { chain: String, error: String },
    LlmStart { chain: String, messages: Vec<Message> },
    LlmEnd { chain: String, response: String },
    Route { chain: String, decision: RouteDecision },
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: TraceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ChainObserver for RecordingObserver {
    fn on_chain_start(&self, chain: &str, inputs: &ChainValues) {
        self.push(TraceEvent::ChainStart {
            chain: chain.to_owned(),
            inputs: inputs.clone(),
        });
    }

    fn on_chain_end(&self, chain: &str, outputs: &ChainValues) {
        self.push(TraceEvent::ChainEnd {
            chain: chain.to_owned(),
            outputs: outputs.clone(),
        });
    }

    fn on_chain_error(&self, chain: &str, error: &ChainError) {
        self.push(TraceEvent::ChainError {
            chain: chain.to_owned(),
            error: error.to_string(),
        });
    }

    fn on_llm_start(&self, chain: &str, messages: &[Message]) {
        self.push(TraceEvent::LlmStart {
            chain: chain.to_owned(),
            messages: messages.to_vec(),
        });
    }

    fn on_llm_end(&self, chain: &str, response: &str) {
        self.push(TraceEvent::LlmEnd {
            chain: chain.to_owned(),
            response: response.to_owned(),
        });
    }

    fn on_route(&self, chain: &str, decision: &RouteDecision) {
        self.push(TraceEvent::Route {
            chain: chain.to_owned(),
            decision: decision.clone(),
        });
    }
}

/// Observer, cancellation and deadline for one chain run.
///
/// Cloning shares the observer and the cancellation token, so cancelling any
/// clone stops every call made with it.
#[derive(Clone, Default)]
pub struct RunContext {
    observer: Option<Arc<dyn ChainObserver>>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("observer", &self.observer.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ChainObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Deadline applied to each external call made under this context.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn observe(&self, f: impl FnOnce(&dyn ChainObserver)) {
        if let Some(observer) = &self.observer {
            f(observer.as_ref());
        }
    }

    /// Run `fut` unless the context is cancelled first or the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Cancelled`] on cancellation or timeout, otherwise the
    /// future's own result.
    pub async fn guard<T>(
        &self,
        chain: &str,
        fut: impl Future<Output = Result<T, ChainError>>,
    ) -> Result<T, ChainError> {
        if self.cancel.is_cancelled() {
            return Err(ChainError::cancelled(chain, "run cancelled"));
        }
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                    ChainError::cancelled(chain, format!("timed out after {}ms", limit.as_millis()))
                })?,
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ChainError::cancelled(chain, "run cancelled")),
            res = bounded => res,
        }
    }
}
