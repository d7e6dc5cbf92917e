use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::{gemini, openai};
use rig::streaming::{StreamedAssistantContent, StreamingCompletionResponse};
use serde_json::{Map, Value, json};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    CompletionsFailedSnafu, DEFAULT_GEMINI_MODEL, EmptyMessageSnafu, HistoryRole, HistoryTurn,
    HttpClientSnafu, LlmProvider, MissingApiKeySnafu, ProviderConfig, ProviderError,
    ProviderResult, ProviderStreamHandle, ProviderWorker, StreamEvent, StreamRequest,
    StreamTarget, UnsupportedProviderSnafu, make_event_stream,
};

pub const RIG_GEMINI_PROVIDER_ID: &str = "gemini";
pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RigBackend {
    Gemini,
    OpenAi,
}

impl RigBackend {
    fn from_provider_id(provider_id: &str) -> Option<Self> {
        match provider_id {
            "gemini" | "google" => Some(Self::Gemini),
            "openai" | "rig-openai" => Some(Self::OpenAi),
            _ => None,
        }
    }
}

pub struct RigProviderAdapter {
    config: ProviderConfig,
    backend: RigBackend,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        let backend = RigBackend::from_provider_id(&config.provider_id).context(
            UnsupportedProviderSnafu {
                stage: "rig-adapter-backend",
                provider_id: config.provider_id.clone(),
            },
        )?;

        Ok(Self { config, backend })
    }

    fn build_gemini_client(config: &ProviderConfig) -> ProviderResult<gemini::Client> {
        let mut builder = gemini::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-gemini-client",
        })
    }

    fn build_openai_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-openai-client",
        })
    }

    fn to_rig_messages(history: &[HistoryTurn]) -> Vec<RigMessage> {
        history
            .iter()
            .filter(|turn| {
                // Remote APIs reject empty content parts.
                let keep = !turn.text.is_empty();
                if !keep {
                    tracing::debug!(role = ?turn.role, "skipping empty history turn");
                }
                keep
            })
            .map(|turn| match turn.role {
                HistoryRole::User => RigMessage::user(turn.text.clone()),
                HistoryRole::Model => RigMessage::assistant(turn.text.clone()),
            })
            .collect()
    }

    /// Gemini extras passed through rig's `additional_params`.
    ///
    /// rig copies `temperature` and `max_tokens` into the request only when a
    /// `generationConfig` object is present, so one is always sent. Keys other than
    /// `generationConfig` are flattened into the request body.
    fn gemini_additional_params(request: &StreamRequest) -> Value {
        let mut params = Map::new();
        params.insert("generationConfig".to_string(), json!({}));
        if request.search_grounding {
            params.insert("tools".to_string(), json!([{ "googleSearch": {} }]));
        }
        Value::Object(params)
    }

    async fn open_stream<M>(
        model: M,
        request: &StreamRequest,
        additional_params: Option<Value>,
    ) -> ProviderResult<StreamingCompletionResponse<M::StreamingResponse>>
    where
        M: CompletionModel,
    {
        let messages = Self::to_rig_messages(&request.history);
        tracing::debug!(
            target = ?request.target,
            model_id = %request.model_id,
            history_len = messages.len(),
            "opening provider stream"
        );

        let mut builder = model
            .completion_request(RigMessage::user(request.message.clone()))
            .messages(messages);

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            builder = builder.preamble(preamble.clone());
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        if let Some(additional_params) = additional_params {
            builder = builder.additional_params(additional_params);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEvent>,
        target: StreamTarget,
        error: ProviderError,
    ) {
        let _ = event_tx.send(StreamEvent::error(target, error.to_string()));
    }

    fn map_stream_item<R>(
        target: StreamTarget,
        item: StreamedAssistantContent<R>,
    ) -> Option<StreamEvent>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) => Some(StreamEvent::fragment(target, text.text)),
            // Only visible answer text reaches the transcript.
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn drive_stream<M>(
        model: M,
        request: StreamRequest,
        additional_params: Option<Value>,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) where
        M: CompletionModel,
    {
        let target = request.target;
        let mut stream = match Self::open_stream(model, &request, additional_params).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    target = ?target,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit_error_event(&event_tx, target, error);
                return;
            }
        };

        let mut fragment_count = 0usize;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    // Consumer went away; stop provider IO promptly.
                    tracing::debug!(target = ?target, fragment_count, "provider stream cancelled");
                    stream.cancel();
                    return;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(event) = Self::map_stream_item(target, item) {
                                fragment_count += 1;
                                if event_tx.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                target = ?target,
                                fragment_count,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, target, error);
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::debug!(target = ?target, fragment_count, "provider stream exhausted");
        let _ = event_tx.send(StreamEvent::done(target));
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        backend: RigBackend,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;
        match backend {
            RigBackend::Gemini => match Self::build_gemini_client(&config) {
                Ok(client) => {
                    let model = client.completion_model(request.model_id.clone());
                    let params = Self::gemini_additional_params(&request);
                    Self::drive_stream(model, request, Some(params), event_tx, cancel_rx).await;
                }
                Err(error) => {
                    tracing::error!(target = ?target, error = %error, "failed to build gemini client");
                    Self::emit_error_event(&event_tx, target, error);
                }
            },
            RigBackend::OpenAi => match Self::build_openai_client(&config) {
                Ok(client) => {
                    if request.search_grounding {
                        tracing::debug!(target = ?target, "search grounding is not available for openai");
                    }
                    let model = client.completion_model(request.model_id.clone());
                    Self::drive_stream(model, request, None, event_tx, cancel_rx).await;
                }
                Err(error) => {
                    tracing::error!(target = ?target, error = %error, "failed to build openai client");
                    Self::emit_error_event(&event_tx, target, error);
                }
            },
        }
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        match self.backend {
            RigBackend::Gemini => "Rig Gemini",
            RigBackend::OpenAi => "Rig OpenAI",
        }
    }

    fn default_model(&self) -> &str {
        match self.backend {
            RigBackend::Gemini => DEFAULT_GEMINI_MODEL,
            RigBackend::OpenAi => DEFAULT_OPENAI_MODEL,
        }
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.message.trim().is_empty(),
            EmptyMessageSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            self.backend,
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    async fn read_request_body(socket: &mut TcpStream) -> Vec<u8> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.expect("read request");
            assert!(read > 0, "connection closed before the body arrived");
            buffer.extend_from_slice(&chunk[..read]);

            let Some(header_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n")
            else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
            let length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .expect("content-length header");
            let body_start = header_end + 4;
            if buffer.len() >= body_start + length {
                return buffer[body_start..body_start + length].to_vec();
            }
        }
    }

    /// Sends `request` through the gemini backend to a local listener and returns the
    /// JSON body it received.
    async fn capture_gemini_body(request: StreamRequest) -> Value {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let endpoint = format!("http://{}", listener.local_addr().expect("local addr"));
        let adapter = RigProviderAdapter::new(ProviderConfig::new("gemini", "key", endpoint))
            .expect("gemini adapter");

        let handle = adapter.stream_chat(request).expect("stream opens");
        let worker = tokio::spawn(handle.worker);

        let (mut socket, _) = tokio::time::timeout(Duration::from_secs(10), listener.accept())
            .await
            .expect("request arrives")
            .expect("accept connection");
        let body = read_request_body(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n")
            .await
            .expect("write response");
        drop(socket);
        drop(handle.stream);
        worker.abort();

        serde_json::from_slice(&body).expect("json request body")
    }

    #[tokio::test]
    async fn gemini_request_carries_generation_config_and_search_tool() {
        let request = StreamRequest::new(
            StreamTarget::new(1),
            DEFAULT_GEMINI_MODEL,
            vec![],
            "https://example.com",
        )
        .with_temperature(0.1)
        .with_max_tokens(256)
        .with_search_grounding(true);

        let body = capture_gemini_body(request).await;
        assert_eq!(body["generationConfig"]["temperature"].as_f64(), Some(0.1));
        assert_eq!(body["generationConfig"]["maxOutputTokens"].as_u64(), Some(256));
        assert_eq!(body["tools"], json!([{ "googleSearch": {} }]));
    }

    #[tokio::test]
    async fn gemini_request_without_grounding_sends_no_tools() {
        let request =
            StreamRequest::new(StreamTarget::new(2), DEFAULT_GEMINI_MODEL, vec![], "hello")
                .with_temperature(0.1);

        let body = capture_gemini_body(request).await;
        assert_eq!(body["generationConfig"]["temperature"].as_f64(), Some(0.1));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn gemini_additional_params_always_carry_generation_config() {
        let plain = StreamRequest::new(StreamTarget::new(1), DEFAULT_GEMINI_MODEL, vec![], "hi");
        assert_eq!(
            RigProviderAdapter::gemini_additional_params(&plain),
            json!({ "generationConfig": {} })
        );

        let grounded = plain.with_search_grounding(true);
        assert_eq!(
            RigProviderAdapter::gemini_additional_params(&grounded),
            json!({ "generationConfig": {}, "tools": [{ "googleSearch": {} }] })
        );
    }

    #[test]
    fn new_requires_api_key() {
        let error = RigProviderAdapter::new(ProviderConfig::new("gemini", "", ""))
            .err()
            .map(|error| error.to_string());
        assert_eq!(
            error.as_deref(),
            Some("missing API key for provider 'gemini'")
        );
    }

    #[test]
    fn new_rejects_unknown_backend() {
        let result = RigProviderAdapter::new(ProviderConfig::new("anthropic-direct", "key", ""));
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn default_model_follows_backend() {
        let gemini = RigProviderAdapter::new(ProviderConfig::new("google", "key", ""))
            .expect("gemini adapter");
        assert_eq!(gemini.default_model(), DEFAULT_GEMINI_MODEL);
        assert_eq!(gemini.name(), "Rig Gemini");

        let openai = RigProviderAdapter::new(ProviderConfig::new("openai", "key", ""))
            .expect("openai adapter");
        assert_eq!(openai.default_model(), DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn stream_chat_rejects_blank_message() {
        let adapter = RigProviderAdapter::new(ProviderConfig::new("gemini", "key", ""))
            .expect("gemini adapter");
        let request = StreamRequest::new(StreamTarget::new(1), DEFAULT_GEMINI_MODEL, vec![], "  ");
        assert!(matches!(
            adapter.stream_chat(request),
            Err(ProviderError::EmptyMessage { .. })
        ));
    }

    #[test]
    fn empty_history_turns_are_skipped() {
        let history = vec![
            HistoryTurn::user("https://example.com"),
            HistoryTurn::model(""),
            HistoryTurn::model("Sorry"),
        ];
        assert_eq!(RigProviderAdapter::to_rig_messages(&history).len(), 2);
    }
}
