use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    ChatService, CompletionsFailedSnafu, EmptyMessageSetSnafu, FragmentEvent, HttpClientSnafu,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderMessage, ProviderResult,
    ProviderRole, ProviderStreamHandle, ProviderWorker, StreamRequest, make_fragment_stream,
};
use super::wire::StreamFragment;

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// OpenAI-compatible transport that re-shapes rig streaming items into fragments.
///
/// Rig never reports a session title, so fragments from this adapter carry none.
pub struct RigChatService {
    config: ProviderConfig,
}

impl RigChatService {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-service-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match message.role {
            ProviderRole::System => None,
            ProviderRole::User => Some(RigMessage::user(message.content.clone())),
            ProviderRole::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn merged_preamble(request: &StreamRequest) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            preamble_parts.push(preamble.clone());
        }

        // Rig has a single preamble slot; the persona's system message folds into it.
        for message in &request.messages {
            if matches!(message.role, ProviderRole::System) && !message.content.trim().is_empty()
            {
                preamble_parts.push(message.content.clone());
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    async fn open_stream(
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> ProviderResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                agent_id = %request.agent_id,
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-pop-prompt",
                model_id: request.model_id.clone(),
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(request) {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_event(event_tx: &mpsc::UnboundedSender<FragmentEvent>, error: ProviderError) {
        let _ = event_tx.send(FragmentEvent::Error(error.to_string()));
    }

    fn map_stream_item<R>(
        conversation_id: &str,
        item: StreamedAssistantContent<R>,
    ) -> Option<StreamFragment>
    where
        R: Clone + Unpin,
    {
        let fragment = match item {
            StreamedAssistantContent::Text(text) => StreamFragment::answer(text.text),
            StreamedAssistantContent::Reasoning(reasoning) => {
                // Rig can split reasoning into several parts; one fragment per item keeps order.
                let text = reasoning.reasoning.join("");
                if text.is_empty() {
                    return None;
                }
                StreamFragment::thinking(text)
            }
            StreamedAssistantContent::ReasoningDelta { reasoning, .. } => {
                if reasoning.is_empty() {
                    return None;
                }
                StreamFragment::thinking(reasoning)
            }
            StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => return None,
        };

        Some(fragment.with_conversation_id(conversation_id))
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<FragmentEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut stream = match Self::open_stream(&config, &request).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit_error_event(&event_tx, error);
                return;
            }
        };

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(conversation_id = %request.conversation_id, "provider stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(fragment) = Self::map_stream_item(&request.conversation_id, item)
                                && event_tx.send(FragmentEvent::Fragment(Some(fragment))).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                conversation_id = %request.conversation_id,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_event(&event_tx, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            let _ = event_tx.send(FragmentEvent::Done);
        }
    }
}

impl ChatService for RigChatService {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                model_id: request.model_id.clone(),
            }
        );

        let (event_tx, stream, cancel_rx) = make_fragment_stream();
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(messages: Vec<ProviderMessage>) -> StreamRequest {
        StreamRequest::new("agent", DEFAULT_OPENAI_MODEL, "conversation", messages)
    }

    #[test]
    fn new_rejects_blank_api_key() {
        let config = ProviderConfig::new("openai", "   ", "");
        assert!(matches!(
            RigChatService::new(config),
            Err(ProviderError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn stream_chat_rejects_empty_message_set() {
        let service = RigChatService::new(ProviderConfig::new("openai", "sk-test", ""))
            .expect("api key present");
        let result = service.stream_chat(request_with(Vec::new()));
        assert!(matches!(result, Err(ProviderError::EmptyMessageSet { .. })));
    }

    #[test]
    fn preamble_merges_request_preamble_with_system_messages() {
        let request = request_with(vec![
            ProviderMessage::new(ProviderRole::System, "You are terse."),
            ProviderMessage::new(ProviderRole::User, "hi"),
        ])
        .with_preamble("Answer in English.");

        assert_eq!(
            RigChatService::merged_preamble(&request).as_deref(),
            Some("Answer in English.\n\nYou are terse.")
        );
    }

    #[test]
    fn system_messages_are_not_sent_as_chat_turns() {
        let system = ProviderMessage::new(ProviderRole::System, "persona");
        assert!(RigChatService::to_rig_message(&system).is_none());
    }
}
