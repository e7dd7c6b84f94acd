use std::fmt;

use uuid::Uuid;

/// Stable identifier for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<Uuid> for ConversationId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Stable identifier for one message. Transcript lookups go through this, never content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one response-generation cycle.
///
/// Changes on every send or regeneration so stale stream events can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Routing key for stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Done,
    Streaming(StreamSessionId),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    /// Reasoning output; only assistant messages ever carry it.
    pub thoughts_content: Option<String>,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            thoughts_content: None,
            status: MessageStatus::Done,
        }
    }

    pub fn system(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::System, content)
    }

    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content)
    }

    pub fn assistant(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, content)
    }

    /// Empty assistant message that a stream is about to fill.
    pub fn assistant_placeholder(id: MessageId, session_id: StreamSessionId) -> Self {
        Self {
            status: MessageStatus::Streaming(session_id),
            ..Self::assistant(id, String::new())
        }
    }

    pub fn with_thoughts(mut self, thoughts: impl Into<String>) -> Self {
        if self.role == Role::Assistant {
            self.thoughts_content = Some(thoughts.into());
        }
        self
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }
}

/// Display form of message text: leading whitespace dropped, line endings unified to `\n`.
pub fn normalize_display(text: &str) -> String {
    text.trim_start().replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_display_trims_leading_space_and_unifies_newlines() {
        assert_eq!(normalize_display("\n  a\r\nb\rc  "), "a\nb\nc  ");
    }

    #[test]
    fn thoughts_only_attach_to_assistant_messages() {
        let user = Message::user(MessageId::new(1), "hi").with_thoughts("hmm");
        let assistant = Message::assistant(MessageId::new(2), "hey").with_thoughts("hmm");

        assert_eq!(user.thoughts_content, None);
        assert_eq!(assistant.thoughts_content.as_deref(), Some("hmm"));
    }

    #[test]
    fn placeholder_is_streaming_and_empty() {
        let placeholder = Message::assistant_placeholder(MessageId::new(3), StreamSessionId::new(7));
        assert!(placeholder.is_streaming());
        assert!(placeholder.content.is_empty());
        assert_eq!(placeholder.role, Role::Assistant);
    }
}
