use std::sync::Arc;

use autoscript_llm::{FragmentStream, LlmProvider, StreamEvent, StreamRequest};
use tokio::task::JoinHandle;

use crate::session::{ChatSession, ExchangeOutcome, ExchangeRequest, LiveExchange};

/// Per-request knobs forwarded to the provider on every exchange.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExchangeOptions {
    /// Falls back to the provider's default model when `None`.
    pub model_id: Option<String>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub search_grounding: bool,
}

/// Result of the synchronous half of a submission.
pub enum ExchangeStart {
    Rejected,
    /// The provider refused to open a stream; the failure is already in the transcript.
    Failed(ExchangeOutcome),
    Streaming(ActiveExchange),
}

/// An exchange whose fragment sequence is open.
///
/// Dropping it cancels the upstream request.
pub struct ActiveExchange {
    exchange: LiveExchange,
    stream: FragmentStream,
    worker: JoinHandle<()>,
}

impl ActiveExchange {
    pub fn exchange(&self) -> LiveExchange {
        self.exchange
    }

    /// Waits for the next provider event.
    ///
    /// A sequence that closes without a terminal event is reported as an error event.
    pub async fn next_event(&mut self) -> StreamEvent {
        match self.stream.recv().await {
            Some(event) => event,
            None => StreamEvent::error(
                self.exchange.target,
                "provider stream ended before a terminal event",
            ),
        }
    }

    /// Applies events to `session` in arrival order until the exchange settles.
    pub async fn drive(mut self, session: &mut ChatSession) -> ExchangeOutcome {
        loop {
            let event = self.next_event().await;
            if let Some(outcome) = session.apply_stream_event(event) {
                return outcome;
            }
        }
    }
}

impl Drop for ActiveExchange {
    fn drop(&mut self) {
        if !self.worker.is_finished() {
            tracing::debug!(target = ?self.exchange.target, "active exchange dropped with worker running");
        }
    }
}

/// Drives exchanges between a [`ChatSession`] and a remote model.
#[derive(Clone)]
pub struct StreamConsumer {
    provider: Arc<dyn LlmProvider>,
    options: ExchangeOptions,
}

impl StreamConsumer {
    pub fn new(provider: Arc<dyn LlmProvider>, options: ExchangeOptions) -> Self {
        Self { provider, options }
    }

    /// Runs one full exchange: submission, fragment accumulation, settlement.
    ///
    /// Remote failures are recorded in the transcript and never returned.
    pub async fn submit(&self, session: &mut ChatSession, text: impl Into<String>) -> ExchangeOutcome {
        match self.begin(session, text) {
            ExchangeStart::Rejected => ExchangeOutcome::Rejected,
            ExchangeStart::Failed(outcome) => outcome,
            ExchangeStart::Streaming(active) => active.drive(session).await,
        }
    }

    /// Submission plus stream opening. Must be called from within a tokio runtime.
    pub fn begin(&self, session: &mut ChatSession, text: impl Into<String>) -> ExchangeStart {
        let Some(request) = session.begin_exchange(text) else {
            return ExchangeStart::Rejected;
        };

        let exchange = request.exchange;
        match self.provider.stream_chat(self.build_request(request)) {
            Ok(handle) => {
                let worker = tokio::spawn(handle.worker);
                ExchangeStart::Streaming(ActiveExchange {
                    exchange,
                    stream: handle.stream,
                    worker,
                })
            }
            Err(error) => {
                tracing::error!(
                    target = ?exchange.target,
                    provider_id = %self.provider.id(),
                    error = %error,
                    "failed to open provider stream"
                );
                let outcome = session
                    .fail_exchange(exchange.target, &error.to_string())
                    .unwrap_or(ExchangeOutcome::Failed {
                        placeholder: exchange.placeholder,
                    });
                ExchangeStart::Failed(outcome)
            }
        }
    }

    fn build_request(&self, request: ExchangeRequest) -> StreamRequest {
        let model_id = self
            .options
            .model_id
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());

        let mut stream_request = StreamRequest::new(
            request.exchange.target,
            model_id,
            request.history,
            request.message,
        );
        if let Some(preamble) = &self.options.preamble {
            stream_request = stream_request.with_preamble(preamble.clone());
        }
        if let Some(temperature) = self.options.temperature {
            stream_request = stream_request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            stream_request = stream_request.with_max_tokens(max_tokens);
        }
        stream_request.with_search_grounding(self.options.search_grounding)
    }
}
