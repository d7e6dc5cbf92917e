use std::sync::Mutex;

use snafu::ensure;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    EmptyMessageSnafu, LlmProvider, ProviderError, ProviderResult, ProviderStreamHandle,
    ProviderWorker, ScriptedSnafu, StreamEvent, StreamRequest, StreamTarget, make_event_stream,
};

pub const SCRIPTED_PROVIDER_ID: &str = "scripted";
pub const SCRIPTED_MODEL: &str = "scripted-echo";

/// One scripted reaction of the fake model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Fragment(String),
    /// Terminates the sequence with an error event.
    Fail(String),
}

/// How one exchange plays out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// `stream_chat` itself fails before any stream exists.
    RefuseToOpen(String),
    Steps(Vec<ScriptStep>),
    /// Emits the fragments and then closes without a terminal event.
    Truncated(Vec<String>),
}

impl Script {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Steps(
            fragments
                .into_iter()
                .map(|fragment| ScriptStep::Fragment(fragment.into()))
                .collect(),
        )
    }

    pub fn fail_after<I, S>(fragments: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps = fragments
            .into_iter()
            .map(|fragment| ScriptStep::Fragment(fragment.into()))
            .collect::<Vec<_>>();
        steps.push(ScriptStep::Fail(message.into()));
        Self::Steps(steps)
    }
}

/// In-memory provider replaying queued scripts, one per exchange.
///
/// With an empty queue it echoes the user message back word by word.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        let provider = Self::new();
        for script in scripts {
            provider.push_script(script);
        }
        provider
    }

    pub fn push_script(&self, script: Script) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(script);
        }
    }

    /// Requests observed so far, oldest first.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_script(&self, request: &StreamRequest) -> Script {
        let queued = self.scripts.lock().ok().and_then(|mut scripts| {
            if scripts.is_empty() {
                None
            } else {
                Some(scripts.remove(0))
            }
        });

        queued.unwrap_or_else(|| {
            let mut fragments = Vec::new();
            for (index, word) in request.message.split_whitespace().enumerate() {
                if index == 0 {
                    fragments.push(word.to_string());
                } else {
                    fragments.push(format!(" {word}"));
                }
            }
            Script::fragments(fragments)
        })
    }

    async fn run_script(
        script: Script,
        target: StreamTarget,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let (steps, terminate) = match script {
            Script::RefuseToOpen(_) => return,
            Script::Steps(steps) => (steps, true),
            Script::Truncated(fragments) => (
                fragments.into_iter().map(ScriptStep::Fragment).collect(),
                false,
            ),
        };

        for step in steps {
            // One step per scheduler turn.
            tokio::task::yield_now().await;
            if !matches!(cancel_rx.try_recv(), Err(TryRecvError::Empty)) {
                tracing::debug!(target = ?target, "scripted stream cancelled");
                return;
            }
            let event = match step {
                ScriptStep::Fragment(text) => StreamEvent::fragment(target, text),
                ScriptStep::Fail(message) => {
                    let error = ProviderError::Scripted {
                        stage: "scripted-stream",
                        message,
                    };
                    let _ = event_tx.send(StreamEvent::error(target, error.to_string()));
                    return;
                }
            };
            if event_tx.send(event).is_err() {
                return;
            }
        }

        if terminate {
            let _ = event_tx.send(StreamEvent::done(target));
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        SCRIPTED_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn default_model(&self) -> &str {
        SCRIPTED_MODEL
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.message.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "scripted-stream-chat",
                target: request.target,
            }
        );

        let script = self.next_script(&request);
        let target = request.target;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if let Script::RefuseToOpen(message) = &script {
            tracing::debug!(target = ?target, "scripted provider refusing to open stream");
            return ScriptedSnafu {
                stage: "scripted-open",
                message: message.clone(),
            }
            .fail();
        }

        let (event_tx, stream, cancel_rx) = make_event_stream(target);
        let worker: ProviderWorker = Box::pin(Self::run_script(script, target, event_tx, cancel_rx));
        Ok(ProviderStreamHandle { stream, worker })
    }
}
