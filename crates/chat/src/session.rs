use autoscript_llm::{HistoryTurn, StreamEvent, StreamEventPayload, StreamTarget};

use crate::events::TranscriptSubscription;
use crate::message::MessageId;
use crate::transcript::Transcript;

/// Text of the transcript entry appended when the remote model fails.
pub const REMOTE_FAILURE_TEXT: &str = "Sorry, I encountered an error connecting to the AI core.";

/// The exchange currently holding the single-flight gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveExchange {
    pub target: StreamTarget,
    pub placeholder: MessageId,
}

/// Everything needed to open the fragment sequence for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub exchange: LiveExchange,
    /// Transcript as it stood before the new user message.
    pub history: Vec<HistoryTurn>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Empty input or another exchange in flight; nothing changed.
    Rejected,
    Completed { placeholder: MessageId },
    Failed { placeholder: MessageId },
}

/// Explicit per-session state: the transcript, the pending input buffer and the
/// single-flight gate.
///
/// Created at session start and consumed by [`ChatSession::teardown`]. All mutation goes
/// through `&mut self`, so one owner task serializes every exchange.
#[derive(Debug)]
pub struct ChatSession {
    transcript: Transcript,
    input: String,
    live: Option<LiveExchange>,
    next_stream_target: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        tracing::debug!("chat session initialized");
        Self {
            transcript: Transcript::new(),
            input: String::new(),
            live: None,
            next_stream_target: 1,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn subscribe(&mut self) -> TranscriptSubscription {
        self.transcript.subscribe()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    /// True while an exchange holds the gate. The authoritative re-enable signal for
    /// input, regardless of any placeholder left streaming by a failure.
    pub fn is_busy(&self) -> bool {
        self.live.is_some()
    }

    pub fn live_exchange(&self) -> Option<LiveExchange> {
        self.live
    }

    /// Submits the pending input buffer.
    pub fn submit_input(&mut self) -> Option<ExchangeRequest> {
        let text = self.input.clone();
        self.begin_exchange(text)
    }

    /// Runs the synchronous half of a submission: gate check, user record, input reset,
    /// placeholder.
    ///
    /// Returns `None` without any state change for blank input or while busy.
    pub fn begin_exchange(&mut self, text: impl Into<String>) -> Option<ExchangeRequest> {
        let text = text.into();
        if text.trim().is_empty() {
            tracing::trace!("ignoring blank submission");
            return None;
        }

        if let Some(live) = self.live {
            // Single-flight: additional submissions while streaming are dropped.
            tracing::trace!(target = ?live.target, "ignoring submission while busy");
            return None;
        }

        let history = self.transcript.history();
        self.transcript.append_user(text.clone());
        self.input.clear();

        let placeholder = self.transcript.append_model_placeholder();
        let exchange = LiveExchange {
            target: self.alloc_stream_target(),
            placeholder: placeholder.id,
        };
        self.live = Some(exchange);

        tracing::debug!(
            target = ?exchange.target,
            placeholder = placeholder.id.0,
            history_len = history.len(),
            "exchange started"
        );

        Some(ExchangeRequest {
            exchange,
            history,
            message: text,
        })
    }

    /// Applies one provider event. Returns the outcome once the exchange settles.
    pub fn apply_stream_event(&mut self, event: StreamEvent) -> Option<ExchangeOutcome> {
        let Some(live) = self.live else {
            tracing::debug!(target = ?event.target, "dropping stream event with no live exchange");
            return None;
        };

        if live.target != event.target {
            // Stale chunk from an earlier exchange.
            tracing::debug!(
                target = ?event.target,
                live_target = ?live.target,
                "dropping stale stream event"
            );
            return None;
        }

        match event.payload {
            StreamEventPayload::Fragment(fragment) => {
                self.transcript.append_fragment(live.placeholder, &fragment);
                None
            }
            StreamEventPayload::Done => {
                self.transcript.complete_streaming(live.placeholder);
                self.live = None;
                tracing::debug!(target = ?live.target, "exchange completed");
                Some(ExchangeOutcome::Completed {
                    placeholder: live.placeholder,
                })
            }
            StreamEventPayload::Error(message) => self.fail_exchange(live.target, &message),
        }
    }

    /// Settles the live exchange as failed.
    ///
    /// The placeholder keeps whatever it accumulated and its streaming flag; one error
    /// record is appended and the gate is released.
    pub fn fail_exchange(&mut self, target: StreamTarget, reason: &str) -> Option<ExchangeOutcome> {
        let live = self.live.filter(|live| live.target == target)?;

        tracing::warn!(target = ?target, error = %reason, "exchange failed");
        self.transcript.append_error(REMOTE_FAILURE_TEXT);
        self.live = None;
        Some(ExchangeOutcome::Failed {
            placeholder: live.placeholder,
        })
    }

    /// Ends the session, handing back the transcript.
    pub fn teardown(self) -> Transcript {
        tracing::debug!(
            message_count = self.transcript.len(),
            busy = self.live.is_some(),
            "chat session torn down"
        );
        self.transcript
    }

    fn alloc_stream_target(&mut self) -> StreamTarget {
        let target = StreamTarget::new(self.next_stream_target);
        // Targets are never reused within a session.
        self.next_stream_target = self.next_stream_target.saturating_add(1);
        target
    }
}
