//! Conversation controller.
//!
//! Owns every open conversation and at most one live response cycle. A cycle is
//! tagged with a [`StreamTarget`]; stream events carrying any other target are
//! rejected, so starting a new cycle, switching conversations or cancelling makes
//! the previous stream inert without any lock.

use std::collections::HashMap;
use std::sync::Arc;

use quill_llm::{
    CLIENT_PLACEHOLDER_TITLE, ChatService, FragmentEvent, FragmentStream, ProviderMessage,
    ProviderRole, ProviderStreamHandle, StreamFragment, StreamRequest,
};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentProfile;
use crate::assembler::StreamAssembler;
use crate::error::{
    ChatResult, EmptyMessageSnafu, NoActiveAgentSnafu, NoActiveConversationSnafu,
    OpenStreamSnafu, ServiceNotConfiguredSnafu,
};
use crate::file_reference;
use crate::message::{
    ConversationId, Message, MessageId, MessageStatus, Role, StreamSessionId, StreamTarget,
};
use crate::presenter::{Presenter, RenderJob};
use crate::regeneration::{RegenerateFrom, RegenerationPlan};
use crate::transcript::ConversationTranscript;

const READER_CLOSED_EARLY: &str = "provider stream ended before a terminal event";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub transcript: ConversationTranscript,
    /// Server-assigned session, recorded from the first fragment that carries one.
    pub server_session_id: Option<Uuid>,
}

impl Conversation {
    fn new(id: ConversationId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            transcript: ConversationTranscript::new(),
            server_session_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEventKind {
    Stream(FragmentEvent),
    /// The reader saw the fragment stream end.
    ReaderClosed,
}

/// A stream event routed back to the controller, tagged with the cycle it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEvent {
    pub target: StreamTarget,
    pub kind: CycleEventKind,
}

struct ActiveStream {
    target: StreamTarget,
    assistant_message_id: MessageId,
    assembler: StreamAssembler,
    cancel: CancellationToken,
    worker_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

pub struct ChatSession {
    service: Option<Arc<dyn ChatService>>,
    agent: Option<AgentProfile>,
    presenter: Presenter,
    conversations: HashMap<ConversationId, Conversation>,
    conversation_order: Vec<ConversationId>,
    active_conversation_id: Option<ConversationId>,
    active_stream: Option<ActiveStream>,
    next_message_id: u64,
    next_stream_session_id: u64,
    inbox_tx: mpsc::UnboundedSender<CycleEvent>,
    inbox_rx: mpsc::UnboundedReceiver<CycleEvent>,
}

impl ChatSession {
    pub fn new(presenter: Presenter) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            service: None,
            agent: None,
            presenter,
            conversations: HashMap::new(),
            conversation_order: Vec::new(),
            active_conversation_id: None,
            active_stream: None,
            next_message_id: 1,
            next_stream_session_id: 1,
            inbox_tx,
            inbox_rx,
        }
    }

    pub fn set_service(&mut self, service: Option<Arc<dyn ChatService>>) {
        if let Some(service) = &service {
            tracing::info!(service_id = service.id(), "chat service configured");
        }
        self.service = service;
    }

    /// Selects the agent for future cycles. Existing transcripts keep their system message.
    pub fn set_agent(&mut self, agent: Option<AgentProfile>) {
        self.agent = agent;
    }

    pub fn agent(&self) -> Option<&AgentProfile> {
        self.agent.as_ref()
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    pub fn active_conversation_id(&self) -> Option<ConversationId> {
        self.active_conversation_id
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_conversation_id
            .and_then(|id| self.conversations.get(&id))
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// Conversations in creation order.
    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversation_order
            .iter()
            .filter_map(|id| self.conversations.get(id))
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn alloc_stream_session_id(&mut self) -> StreamSessionId {
        let id = StreamSessionId::new(self.next_stream_session_id);
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);
        id
    }

    fn fresh_system_message(&mut self) -> Option<Message> {
        let prompt = self.agent.as_ref()?.system_prompt()?.to_string();
        Some(Message::system(self.alloc_message_id(), prompt))
    }

    /// Opens an empty conversation and makes it active.
    pub fn new_conversation(&mut self) -> ConversationId {
        let id = ConversationId::new_v4();
        let mut conversation = Conversation::new(id, CLIENT_PLACEHOLDER_TITLE);
        if let Some(system) = self.fresh_system_message() {
            conversation.transcript.append(system);
        }

        self.conversations.insert(id, conversation);
        self.conversation_order.push(id);
        tracing::debug!(conversation_id = %id, "conversation created");
        self.select_conversation(id);
        id
    }

    /// Installs a stored conversation and makes it active.
    ///
    /// Stored system messages are dropped and a fresh one is built from the current
    /// agent. Messages get new ids; stored ids carry no meaning here.
    pub fn load_conversation(
        &mut self,
        id: ConversationId,
        title: impl Into<String>,
        messages: impl IntoIterator<Item = Message>,
        server_session_id: Option<Uuid>,
    ) {
        if self.active_conversation_id == Some(id) {
            self.cancel_active_stream();
        }

        let mut transcript = ConversationTranscript::new();
        if let Some(system) = self.fresh_system_message() {
            transcript.append(system);
        }
        for stored in messages {
            if stored.role == Role::System {
                continue;
            }
            transcript.append(Message {
                id: self.alloc_message_id(),
                status: match stored.status {
                    MessageStatus::Streaming(_) => MessageStatus::Done,
                    status => status,
                },
                ..stored
            });
        }

        let conversation = Conversation {
            id,
            title: title.into(),
            transcript,
            server_session_id,
        };
        tracing::info!(
            conversation_id = %id,
            message_count = conversation.transcript.len(),
            "conversation loaded"
        );
        if self.conversations.insert(id, conversation).is_none() {
            self.conversation_order.push(id);
        }
        self.select_conversation(id);
    }

    /// Makes `id` the active conversation, cancelling any in-flight cycle first.
    ///
    /// Re-selecting the conversation that is already streaming leaves its cycle running.
    pub fn select_conversation(&mut self, id: ConversationId) -> bool {
        if !self.conversations.contains_key(&id) {
            tracing::warn!(conversation_id = %id, "cannot select unknown conversation");
            return false;
        }
        if self.active_conversation_id == Some(id) && self.is_streaming() {
            return true;
        }

        self.cancel_active_stream();
        self.active_conversation_id = Some(id);

        if let Some(conversation) = self.conversations.get(&id) {
            self.presenter.reset(
                id,
                conversation.title.clone(),
                conversation.transcript.messages(),
            );
        }
        true
    }

    fn ensure_ready(&self, stage: &'static str) -> ChatResult<ConversationId> {
        ensure!(self.agent.is_some(), NoActiveAgentSnafu { stage });
        ensure!(self.service.is_some(), ServiceNotConfiguredSnafu { stage });
        self.active_conversation_id
            .context(NoActiveConversationSnafu { stage })
    }

    /// Appends a user turn (optionally tagged with an attachment) and starts its response.
    pub fn submit(&mut self, text: &str, attachment: Option<&str>) -> ChatResult<MessageId> {
        let conversation_id = self.ensure_ready("submit")?;
        let text = text.trim();
        let attachment = attachment
            .map(str::trim)
            .filter(|name| !name.is_empty());
        ensure!(
            !text.is_empty() || attachment.is_some(),
            EmptyMessageSnafu { stage: "submit" }
        );

        self.cancel_active_stream();

        let mut message = Message::user(self.alloc_message_id(), text);
        if let Some(name) = attachment {
            file_reference::add_file(&mut message, name);
        }
        let message_id = message.id;

        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .context(NoActiveConversationSnafu { stage: "submit" })?;
        self.presenter.append(&message);
        conversation.transcript.append(message);

        self.start_cycle(conversation_id)?;
        Ok(message_id)
    }

    /// Keeps `user_message` and drops everything after it, then asks again.
    ///
    /// Returns `Ok(false)` when the message is not a user turn of the active transcript.
    pub fn regenerate_from_user(&mut self, user_message: MessageId) -> ChatResult<bool> {
        self.regenerate(RegenerateFrom::User(user_message))
    }

    /// Drops `assistant_message` and everything after it, then re-asks the user turn before it.
    ///
    /// Returns `Ok(false)` when there is nothing to regenerate.
    pub fn regenerate_from_assistant(&mut self, assistant_message: MessageId) -> ChatResult<bool> {
        self.regenerate(RegenerateFrom::Assistant(assistant_message))
    }

    fn regenerate(&mut self, request: RegenerateFrom) -> ChatResult<bool> {
        let conversation_id = self.ensure_ready("regenerate")?;
        let conversation = self
            .conversations
            .get(&conversation_id)
            .context(NoActiveConversationSnafu {
                stage: "regenerate",
            })?;
        let Some(plan) = RegenerationPlan::for_request(&conversation.transcript, request) else {
            tracing::debug!(?request, "regeneration target not applicable; ignoring");
            return Ok(false);
        };

        // The live placeholder is always the last message, so the plan's cut point and
        // re-issued turn survive its removal.
        self.cancel_active_stream();

        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .context(NoActiveConversationSnafu {
                stage: "regenerate",
            })?;
        self.presenter
            .truncated(plan.truncate_from, plan.discarded(&conversation.transcript));
        let removed = plan.apply(&mut conversation.transcript);
        tracing::info!(
            conversation_id = %conversation_id,
            truncate_from = plan.truncate_from,
            removed = removed.len(),
            reissue = plan.reissue.0,
            "transcript truncated for regeneration"
        );

        self.start_cycle(conversation_id)?;
        Ok(true)
    }

    fn build_provider_messages(transcript: &ConversationTranscript) -> Vec<ProviderMessage> {
        transcript
            .messages()
            .iter()
            .filter(|message| !message.is_streaming() && !message.content.trim().is_empty())
            .map(|message| {
                let role = match message.role {
                    Role::System => ProviderRole::System,
                    Role::User => ProviderRole::User,
                    Role::Assistant => ProviderRole::Assistant,
                };
                ProviderMessage::new(role, message.content.clone())
            })
            .collect()
    }

    fn start_cycle(&mut self, conversation_id: ConversationId) -> ChatResult<StreamTarget> {
        let service = self
            .service
            .clone()
            .context(ServiceNotConfiguredSnafu {
                stage: "start-cycle",
            })?;
        let agent = self
            .agent
            .clone()
            .context(NoActiveAgentSnafu {
                stage: "start-cycle",
            })?;

        let target = StreamTarget::new(conversation_id, self.alloc_stream_session_id());
        let assistant_message_id = self.alloc_message_id();

        let conversation = self
            .conversations
            .get_mut(&conversation_id)
            .context(NoActiveConversationSnafu {
                stage: "start-cycle",
            })?;
        let messages = Self::build_provider_messages(&conversation.transcript);
        let placeholder = Message::assistant_placeholder(assistant_message_id, target.session_id);
        self.presenter.append(&placeholder);
        conversation.transcript.append(placeholder);

        let request = StreamRequest::new(
            agent.id,
            agent.model_id,
            conversation_id.to_string(),
            messages,
        )
        .with_chat_session_id(conversation.server_session_id)
        .with_tools(agent.tools);
        let request = match (agent.temperature, agent.max_tokens) {
            (Some(temperature), Some(max_tokens)) => request
                .with_temperature(temperature)
                .with_max_tokens(max_tokens),
            (Some(temperature), None) => request.with_temperature(temperature),
            (None, Some(max_tokens)) => request.with_max_tokens(max_tokens),
            (None, None) => request,
        };

        tracing::debug!(
            conversation_id = %conversation_id,
            stream_session_id = target.session_id.0,
            message_count = request.messages.len(),
            "starting response cycle"
        );

        match service.stream_chat(request) {
            Ok(handle) => {
                self.spawn_stream_pipeline(target, assistant_message_id, handle);
                Ok(target)
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "failed to open response stream"
                );
                if let Some(message) = conversation.transcript.find_mut(assistant_message_id) {
                    message.status = MessageStatus::Error(error.to_string());
                    self.presenter.update(RenderJob::from_message(message));
                }
                Err(error).context(OpenStreamSnafu {
                    stage: "start-cycle",
                })
            }
        }
    }

    fn spawn_stream_pipeline(
        &mut self,
        target: StreamTarget,
        assistant_message_id: MessageId,
        handle: ProviderStreamHandle,
    ) {
        let cancel = CancellationToken::new();
        let worker_task = tokio::spawn(handle.worker);
        let reader_task = tokio::spawn(forward_stream_events(
            target,
            handle.stream,
            self.inbox_tx.clone(),
            cancel.clone(),
        ));

        let mut assembler = StreamAssembler::new();
        assembler.begin();

        self.active_stream = Some(ActiveStream {
            target,
            assistant_message_id,
            assembler,
            cancel,
            worker_task,
            reader_task,
        });
    }

    /// Stops the live cycle and removes its unfinished assistant message.
    pub fn cancel_active_stream(&mut self) -> bool {
        let Some(active) = self.active_stream.take() else {
            return false;
        };

        // Aborting the reader drops the fragment stream, which also signals the worker.
        active.cancel.cancel();
        active.reader_task.abort();
        active.worker_task.abort();

        let conversation_id = active.target.conversation_id;
        if let Some(conversation) = self.conversations.get_mut(&conversation_id)
            && let Some(index) = conversation
                .transcript
                .index_of(active.assistant_message_id)
        {
            let removed = conversation.transcript.remove_suffix_from(index);
            if self.active_conversation_id == Some(conversation_id) {
                self.presenter.truncated(index, &removed);
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            stream_session_id = active.target.session_id.0,
            "response cycle cancelled"
        );
        true
    }

    fn stream_event_is_current(&self, target: StreamTarget) -> bool {
        self.active_stream
            .as_ref()
            .is_some_and(|active| active.target == target)
    }

    /// Waits for the next routed stream event.
    pub async fn next_cycle_event(&mut self) -> Option<CycleEvent> {
        self.inbox_rx.recv().await
    }

    /// Applies stream events until no cycle is live.
    pub async fn run_until_idle(&mut self) {
        while self.active_stream.is_some() {
            let Some(event) = self.inbox_rx.recv().await else {
                break;
            };
            self.handle_cycle_event(event);
        }
    }

    pub fn handle_cycle_event(&mut self, event: CycleEvent) {
        if !self.stream_event_is_current(event.target) {
            match event.kind {
                CycleEventKind::ReaderClosed => tracing::debug!(
                    conversation_id = %event.target.conversation_id,
                    stream_session_id = event.target.session_id.0,
                    "reader for a finished cycle closed"
                ),
                CycleEventKind::Stream(_) => tracing::warn!(
                    conversation_id = %event.target.conversation_id,
                    stream_session_id = event.target.session_id.0,
                    "rejecting event from a stale stream"
                ),
            }
            return;
        }

        match event.kind {
            CycleEventKind::Stream(FragmentEvent::Fragment(fragment)) => {
                self.apply_fragment(fragment.as_ref());
            }
            CycleEventKind::Stream(FragmentEvent::Done) => self.finish_cycle(None),
            CycleEventKind::Stream(FragmentEvent::Error(message)) => {
                self.finish_cycle(Some(message));
            }
            CycleEventKind::ReaderClosed => {
                self.finish_cycle(Some(READER_CLOSED_EARLY.to_string()));
            }
        }
    }

    fn apply_fragment(&mut self, fragment: Option<&StreamFragment>) {
        let Some(active) = self.active_stream.as_mut() else {
            return;
        };
        let Some(conversation) = self.conversations.get_mut(&active.target.conversation_id) else {
            return;
        };

        if conversation.server_session_id.is_none()
            && let Some(chat_session_id) = fragment.and_then(|fragment| fragment.chat_session_id)
        {
            tracing::info!(
                conversation_id = %conversation.id,
                %chat_session_id,
                "server session assigned"
            );
            conversation.server_session_id = Some(chat_session_id);
        }

        let Some(update) = active.assembler.apply(fragment) else {
            return;
        };
        let Some(message) = conversation
            .transcript
            .find_mut(active.assistant_message_id)
        else {
            return;
        };

        message.content = update.content;
        message.thoughts_content = (!update.thinking.is_empty()).then_some(update.thinking);
        self.presenter.update(
            RenderJob::from_message(message)
                .with_stream_flags(update.is_thinking, update.is_collecting_thoughts),
        );
    }

    /// Materializes the assistant message from the assembled buffers.
    ///
    /// With an error the partial answer is kept and marked failed.
    fn finish_cycle(&mut self, error: Option<String>) {
        let Some(mut active) = self.active_stream.take() else {
            return;
        };
        active.cancel.cancel();

        let response = active.assembler.finish();
        let conversation_id = active.target.conversation_id;
        let Some(conversation) = self.conversations.get_mut(&conversation_id) else {
            return;
        };

        if let Some(message) = conversation
            .transcript
            .find_mut(active.assistant_message_id)
        {
            message.content = response.content;
            message.thoughts_content =
                (!response.thinking.is_empty()).then_some(response.thinking);
            message.status = match &error {
                Some(error) => MessageStatus::Error(error.clone()),
                None => MessageStatus::Done,
            };
            self.presenter.update(RenderJob::from_message(message));
        }

        if !response.title.is_empty() && conversation.title != response.title {
            tracing::info!(
                conversation_id = %conversation_id,
                title = %response.title,
                "conversation title updated"
            );
            conversation.title = response.title;
            self.presenter
                .title_changed(conversation_id, conversation.title.clone());
        }

        match error {
            Some(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    stream_session_id = active.target.session_id.0,
                    error = %error,
                    "response cycle failed; keeping partial answer"
                );
                self.presenter.notice(format!("Response failed: {error}"));
            }
            None => tracing::debug!(
                conversation_id = %conversation_id,
                stream_session_id = active.target.session_id.0,
                "response cycle completed"
            ),
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(active) = self.active_stream.take() {
            active.cancel.cancel();
            active.reader_task.abort();
            active.worker_task.abort();
        }
    }
}

async fn forward_stream_events(
    target: StreamTarget,
    mut stream: FragmentStream,
    inbox: mpsc::UnboundedSender<CycleEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = stream.recv() => event,
        };
        let Some(event) = event else {
            break;
        };

        let routed = CycleEvent {
            target,
            kind: CycleEventKind::Stream(event),
        };
        if inbox.send(routed).is_err() {
            return;
        }
    }

    let _ = inbox.send(CycleEvent {
        target,
        kind: CycleEventKind::ReaderClosed,
    });
}
