//! Bridge from the core to whatever displays the conversation.
//!
//! The core never renders inline. It queues commands on a [`Presenter`], whose task
//! renders markdown and posts [`ViewEvent`]s to the injected
//! [`PresentationContext`] in the order the commands were queued.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::file_reference;
use crate::message::{ConversationId, Message, MessageId, MessageStatus, Role, normalize_display};

/// Markdown-to-display conversion, supplied by the host.
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// Renderer that passes text through with display normalization only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl MarkdownRenderer for PlainTextRenderer {
    fn render(&self, markdown: &str) -> String {
        normalize_display(markdown)
    }
}

/// "Post to the presentation context" capability. Implementations hop to their UI thread.
pub trait PresentationContext: Send + Sync {
    fn post(&self, event: ViewEvent);
}

impl PresentationContext for mpsc::UnboundedSender<ViewEvent> {
    fn post(&self, event: ViewEvent) {
        if self.send(event).is_err() {
            tracing::debug!("presentation context closed; dropping view event");
        }
    }
}

/// One rendered row of the conversation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub message_id: MessageId,
    pub role: Role,
    pub rendered: String,
    pub rendered_thoughts: Option<String>,
    pub is_loaded: bool,
    pub is_thinking: bool,
    pub is_collecting_thoughts: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    Reset {
        conversation_id: ConversationId,
        title: String,
        entries: Vec<MessageView>,
    },
    Appended(MessageView),
    Updated(MessageView),
    /// Rows removed by a truncation, starting at `from_index`.
    Truncated {
        from_index: usize,
        removed: Vec<MessageId>,
    },
    TitleChanged {
        conversation_id: ConversationId,
        title: String,
    },
    Notice(String),
}

/// Unrendered row state captured on the caller's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub message_id: MessageId,
    pub role: Role,
    pub content: String,
    pub thoughts: Option<String>,
    pub is_loaded: bool,
    pub is_thinking: bool,
    pub is_collecting_thoughts: bool,
    pub error: Option<String>,
}

impl RenderJob {
    pub fn from_message(message: &Message) -> Self {
        let content = match message.role {
            Role::User => file_reference::content_with_file_display(message),
            Role::System | Role::Assistant => message.content.clone(),
        };
        let error = match &message.status {
            MessageStatus::Error(error) => Some(error.clone()),
            MessageStatus::Done | MessageStatus::Streaming(_) => None,
        };

        Self {
            message_id: message.id,
            role: message.role,
            content,
            thoughts: message.thoughts_content.clone(),
            is_loaded: !message.is_streaming(),
            is_thinking: message
                .thoughts_content
                .as_deref()
                .is_some_and(|thoughts| !thoughts.is_empty()),
            is_collecting_thoughts: false,
            error,
        }
    }

    pub fn with_stream_flags(mut self, is_thinking: bool, is_collecting_thoughts: bool) -> Self {
        self.is_thinking = is_thinking;
        self.is_collecting_thoughts = is_collecting_thoughts;
        self
    }

    fn render(self, renderer: &dyn MarkdownRenderer) -> MessageView {
        MessageView {
            message_id: self.message_id,
            role: self.role,
            rendered: renderer.render(&self.content),
            rendered_thoughts: self
                .thoughts
                .filter(|thoughts| !thoughts.is_empty())
                .map(|thoughts| renderer.render(&thoughts)),
            is_loaded: self.is_loaded,
            is_thinking: self.is_thinking,
            is_collecting_thoughts: self.is_collecting_thoughts,
            error: self.error,
        }
    }
}

enum PresenterCommand {
    Reset {
        conversation_id: ConversationId,
        title: String,
        jobs: Vec<RenderJob>,
    },
    Append(RenderJob),
    Update(RenderJob),
    Post(ViewEvent),
}

/// Queue in front of the render task. Cheap to call from the stream consumer.
#[derive(Clone)]
pub struct Presenter {
    commands: mpsc::UnboundedSender<PresenterCommand>,
}

impl Presenter {
    /// Spawns the render task on the current tokio runtime.
    pub fn spawn(
        renderer: Arc<dyn MarkdownRenderer>,
        context: Arc<dyn PresentationContext>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_render_loop(renderer, context, command_rx));
        Self { commands }
    }

    fn queue(&self, command: PresenterCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("render task stopped; view update dropped");
        }
    }

    pub fn reset<'a>(
        &self,
        conversation_id: ConversationId,
        title: impl Into<String>,
        messages: impl IntoIterator<Item = &'a Message>,
    ) {
        self.queue(PresenterCommand::Reset {
            conversation_id,
            title: title.into(),
            jobs: messages.into_iter().map(RenderJob::from_message).collect(),
        });
    }

    pub fn append(&self, message: &Message) {
        self.queue(PresenterCommand::Append(RenderJob::from_message(message)));
    }

    pub fn update(&self, job: RenderJob) {
        self.queue(PresenterCommand::Update(job));
    }

    pub fn truncated(&self, from_index: usize, removed: &[Message]) {
        if removed.is_empty() {
            return;
        }
        self.queue(PresenterCommand::Post(ViewEvent::Truncated {
            from_index,
            removed: removed.iter().map(|message| message.id).collect(),
        }));
    }

    pub fn title_changed(&self, conversation_id: ConversationId, title: impl Into<String>) {
        self.queue(PresenterCommand::Post(ViewEvent::TitleChanged {
            conversation_id,
            title: title.into(),
        }));
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.queue(PresenterCommand::Post(ViewEvent::Notice(text.into())));
    }
}

async fn run_render_loop(
    renderer: Arc<dyn MarkdownRenderer>,
    context: Arc<dyn PresentationContext>,
    mut command_rx: mpsc::UnboundedReceiver<PresenterCommand>,
) {
    let mut carried = None;

    loop {
        let command = match carried.take() {
            Some(command) => command,
            None => match command_rx.recv().await {
                Some(command) => command,
                None => break,
            },
        };

        let event = match command {
            PresenterCommand::Reset {
                conversation_id,
                title,
                jobs,
            } => ViewEvent::Reset {
                conversation_id,
                title,
                entries: jobs.into_iter().map(|job| job.render(&*renderer)).collect(),
            },
            PresenterCommand::Append(job) => ViewEvent::Appended(job.render(&*renderer)),
            PresenterCommand::Update(mut job) => {
                // Only the newest queued snapshot of a row is worth rendering.
                while let Ok(next) = command_rx.try_recv() {
                    match next {
                        PresenterCommand::Update(next_job) if next_job.message_id == job.message_id => {
                            job = next_job;
                        }
                        other => {
                            carried = Some(other);
                            break;
                        }
                    }
                }
                ViewEvent::Updated(job.render(&*renderer))
            }
            PresenterCommand::Post(event) => event,
        };

        context.post(event);
    }

    tracing::debug!("render loop finished");
}

/// UI-side mirror of the conversation view, driven purely by [`ViewEvent`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageViewList {
    conversation_id: Option<ConversationId>,
    title: String,
    entries: Vec<MessageView>,
    notices: Vec<String>,
}

impl MessageViewList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn entries(&self) -> &[MessageView] {
        &self.entries
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn apply(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::Reset {
                conversation_id,
                title,
                entries,
            } => {
                self.conversation_id = Some(conversation_id);
                self.title = title;
                self.entries = entries;
            }
            ViewEvent::Appended(view) => self.entries.push(view),
            ViewEvent::Updated(view) => {
                match self
                    .entries
                    .iter_mut()
                    .find(|entry| entry.message_id == view.message_id)
                {
                    Some(entry) => *entry = view,
                    None => tracing::debug!(
                        message_id = view.message_id.0,
                        "update for a row that is no longer shown"
                    ),
                }
            }
            ViewEvent::Truncated { removed, .. } => {
                self.entries
                    .retain(|entry| !removed.contains(&entry.message_id));
            }
            ViewEvent::TitleChanged {
                conversation_id,
                title,
            } => {
                if self.conversation_id == Some(conversation_id) {
                    self.title = title;
                }
            }
            ViewEvent::Notice(text) => self.notices.push(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::StreamSessionId;

    fn presenter() -> (Presenter, mpsc::UnboundedReceiver<ViewEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let presenter = Presenter::spawn(Arc::new(PlainTextRenderer), Arc::new(event_tx));
        (presenter, event_rx)
    }

    fn streaming_job(id: MessageId, content: &str) -> RenderJob {
        let mut message = Message::assistant_placeholder(id, StreamSessionId::new(1));
        message.content = content.to_string();
        RenderJob::from_message(&message)
    }

    #[tokio::test]
    async fn user_rows_show_the_attached_file() {
        let (presenter, mut events) = presenter();
        presenter.append(&Message::user(
            MessageId::new(1),
            "<file>report.pdf</file>Please summarize",
        ));

        let Some(ViewEvent::Appended(view)) = events.recv().await else {
            panic!("expected an appended row");
        };
        assert_eq!(view.rendered, "The file is: report.pdf\nPlease summarize");
        assert!(view.is_loaded);
    }

    #[tokio::test]
    async fn queued_updates_for_one_row_are_coalesced_in_order() {
        let (presenter, mut events) = presenter();
        let id = MessageId::new(5);
        presenter.append(&Message::assistant_placeholder(id, StreamSessionId::new(1)));
        presenter.update(streaming_job(id, "a"));
        presenter.update(streaming_job(id, "ab"));
        presenter.update(streaming_job(id, "abc"));
        presenter.notice("done");

        assert!(matches!(events.recv().await, Some(ViewEvent::Appended(_))));
        let Some(ViewEvent::Updated(view)) = events.recv().await else {
            panic!("expected an updated row");
        };
        assert_eq!(view.rendered, "abc");
        assert!(!view.is_loaded);
        assert_eq!(events.recv().await, Some(ViewEvent::Notice("done".to_string())));
    }

    #[tokio::test]
    async fn updates_for_different_rows_are_not_merged() {
        let (presenter, mut events) = presenter();
        presenter.update(streaming_job(MessageId::new(1), "one"));
        presenter.update(streaming_job(MessageId::new(2), "two"));

        let mut rendered = Vec::new();
        for _ in 0..2 {
            if let Some(ViewEvent::Updated(view)) = events.recv().await {
                rendered.push(view.rendered);
            }
        }
        assert_eq!(rendered, vec!["one", "two"]);
    }

    #[test]
    fn view_list_mirrors_truncation_and_ignores_unknown_updates() {
        let conversation_id = ConversationId::new_v4();
        let row = |id: u64| {
            RenderJob::from_message(&Message::user(MessageId::new(id), format!("m{id}")))
                .render(&PlainTextRenderer)
        };

        let mut list = MessageViewList::new();
        list.apply(ViewEvent::Reset {
            conversation_id,
            title: "New Conversation".to_string(),
            entries: vec![row(1), row(2), row(3)],
        });
        list.apply(ViewEvent::Truncated {
            from_index: 1,
            removed: vec![MessageId::new(2), MessageId::new(3)],
        });
        list.apply(ViewEvent::Updated(row(3)));
        list.apply(ViewEvent::TitleChanged {
            conversation_id,
            title: "Refund request".to_string(),
        });
        list.apply(ViewEvent::TitleChanged {
            conversation_id: ConversationId::new_v4(),
            title: "Other".to_string(),
        });

        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].message_id, MessageId::new(1));
        assert_eq!(list.title(), "Refund request");
    }

    #[test]
    fn error_status_and_thoughts_reach_the_row() {
        let mut message = Message::assistant(MessageId::new(9), "\r\n partial").with_thoughts("why");
        message.status = MessageStatus::Error("stream broke".to_string());

        let view = RenderJob::from_message(&message).render(&PlainTextRenderer);
        assert_eq!(view.rendered, "partial");
        assert_eq!(view.rendered_thoughts.as_deref(), Some("why"));
        assert_eq!(view.error.as_deref(), Some("stream broke"));
        assert!(view.is_thinking);
    }
}
