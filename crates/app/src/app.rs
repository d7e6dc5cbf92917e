use std::io::Write;
use std::sync::Arc;

use autoscript_chat::{ActiveExchange, ChatSession, ExchangeStart, StreamConsumer, Transcript};
use autoscript_llm::{LlmProvider, ScriptedProvider, StreamEvent, create_provider};
use snafu::{ResultExt, ensure};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::auth::AuthState;
use crate::error::{AppResult, NotLoggedInSnafu, ProviderSnafu, ReadInputSnafu, WriteOutputSnafu};
use crate::render::TerminalRenderer;
use crate::settings::ProviderSettings;

const QUIT_COMMANDS: [&str; 2] = ["/quit", "/exit"];

/// One interactive session: who is logged in, the provider it talks to, and the chat
/// state. Built by [`AppSession::init`] and ended by [`AppSession::teardown`].
pub struct AppSession {
    auth: AuthState,
    chat: ChatSession,
    consumer: StreamConsumer,
}

impl AppSession {
    pub fn init(settings: Arc<ProviderSettings>, auth: AuthState, offline: bool) -> AppResult<Self> {
        ensure!(auth.is_logged_in, NotLoggedInSnafu { stage: "init-session" });

        let provider: Arc<dyn LlmProvider> = if offline {
            Arc::new(ScriptedProvider::new())
        } else {
            create_provider(settings.to_provider_config()).context(ProviderSnafu {
                stage: "create-provider",
            })?
        };

        tracing::info!(
            username = %auth.username,
            provider_id = %provider.id(),
            model_id = %settings.model_name,
            "session initialized"
        );

        let consumer = StreamConsumer::new(provider, settings.exchange_options());
        Ok(Self {
            auth,
            chat: ChatSession::new(),
            consumer,
        })
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    /// Reads submissions line by line and renders the transcript until input ends.
    ///
    /// Input and stream events are multiplexed on the calling task, so lines typed while
    /// an exchange streams hit the single-flight gate instead of queueing.
    pub async fn run_chat<R, W>(&mut self, input: R, out: &mut W) -> AppResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let mut subscription = self.chat.subscribe();
        let mut renderer = TerminalRenderer::new();
        let mut active: Option<ActiveExchange> = None;
        let mut input_closed = false;

        while !(input_closed && active.is_none()) {
            tokio::select! {
                line = lines.next_line(), if !input_closed => {
                    match line.context(ReadInputSnafu { stage: "read-submission" })? {
                        Some(line) if QUIT_COMMANDS.contains(&line.trim()) => break,
                        Some(line) => self.submit_line(line, &mut active),
                        None => input_closed = true,
                    }
                }
                event = next_active_event(&mut active), if active.is_some() => {
                    if self.chat.apply_stream_event(event).is_some() {
                        active = None;
                    }
                }
            }

            for event in subscription.drain() {
                renderer
                    .render(&event, out)
                    .context(WriteOutputSnafu { stage: "render-transcript" })?;
            }
        }

        Ok(())
    }

    /// Ends the session and hands back the transcript.
    pub fn teardown(self) -> Transcript {
        tracing::info!(username = %self.auth.username, "session ended");
        self.chat.teardown()
    }

    fn submit_line(&mut self, line: String, active: &mut Option<ActiveExchange>) {
        // The pending input buffer is left untouched while busy.
        if self.chat.is_busy() {
            tracing::debug!("submission ignored while a response is streaming");
            return;
        }

        self.chat.set_input(line);
        let input = self.chat.input().to_string();
        match self.consumer.begin(&mut self.chat, input) {
            ExchangeStart::Streaming(exchange) => *active = Some(exchange),
            ExchangeStart::Rejected | ExchangeStart::Failed(_) => {}
        }
    }
}

async fn next_active_event(active: &mut Option<ActiveExchange>) -> StreamEvent {
    match active.as_mut() {
        Some(exchange) => exchange.next_event().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use autoscript_chat::{REMOTE_FAILURE_TEXT, Role};
    use autoscript_llm::ProviderError;

    use super::*;
    use crate::error::AppError;

    fn logged_in() -> AuthState {
        AuthState::logged_in("tester")
    }

    #[test]
    fn init_requires_login() {
        let result = AppSession::init(
            Arc::new(ProviderSettings::default()),
            AuthState::default(),
            true,
        );
        assert!(matches!(result, Err(AppError::NotLoggedIn { .. })));
    }

    #[test]
    fn init_without_api_key_reports_provider_error() {
        let result = AppSession::init(Arc::new(ProviderSettings::default()), logged_in(), false);
        assert!(matches!(
            result,
            Err(AppError::Provider {
                source: ProviderError::MissingApiKey { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn offline_chat_echoes_and_renders_transcript() {
        let mut session =
            AppSession::init(Arc::new(ProviderSettings::default()), logged_in(), true)
                .expect("offline session");
        let mut out = Vec::new();

        session
            .run_chat(&b"https://example.com\n"[..], &mut out)
            .await
            .expect("chat runs");

        let rendered = String::from_utf8(out).expect("utf-8");
        assert_eq!(
            rendered,
            "you> https://example.com\n  target: https://example.com\nmodel> https://example.com\n"
        );

        let transcript = session.teardown();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[1].role, Role::Model);
        assert!(!transcript.messages()[1].is_streaming);
        assert!(!transcript.messages()[1].text.contains(REMOTE_FAILURE_TEXT));
    }

    #[tokio::test]
    async fn blank_lines_and_quit_leave_transcript_empty() {
        let mut session =
            AppSession::init(Arc::new(ProviderSettings::default()), logged_in(), true)
                .expect("offline session");
        let mut out = Vec::new();

        session
            .run_chat(&b"\n   \n/quit\nhttps://never.example\n"[..], &mut out)
            .await
            .expect("chat runs");

        assert!(out.is_empty());
        assert!(session.chat().transcript().is_empty());
        assert!(!session.chat().is_busy());
    }

    #[tokio::test]
    async fn line_typed_while_streaming_is_dropped() {
        let mut session =
            AppSession::init(Arc::new(ProviderSettings::default()), logged_in(), true)
                .expect("offline session");
        let mut out = Vec::new();

        // Both lines are buffered, so the second is read before the first exchange's
        // worker gets a turn.
        session
            .run_chat(&b"first\nsecond\n"[..], &mut out)
            .await
            .expect("chat runs");

        let rendered = String::from_utf8(out).expect("utf-8");
        assert_eq!(rendered, "you> first\nmodel> first\n");
        assert_eq!(session.chat().input(), "");
        assert!(!session.chat().is_busy());

        let transcript = session.teardown();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].text, "first");
    }
}
