use crate::message::{Message, MessageId, Role};

/// Ordered messages of one conversation.
///
/// Holds at most one system message, and only at index 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationTranscript {
    messages: Vec<Message>,
}

impl ConversationTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Appends to the end.
    ///
    /// # Panics
    /// When `message` is a system message and the transcript is not empty.
    pub fn append(&mut self, message: Message) {
        assert!(
            message.role != Role::System || self.messages.is_empty(),
            "system message must be the first and only system entry in a transcript"
        );
        self.messages.push(message);
    }

    /// Removes the message at `index` and everything after it, returning what was removed.
    ///
    /// Out-of-bounds indexes remove nothing.
    pub fn remove_suffix_from(&mut self, index: usize) -> Vec<Message> {
        if index >= self.messages.len() {
            return Vec::new();
        }
        self.messages.split_off(index)
    }

    pub fn index_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|message| message.id == id)
    }

    /// Read-only tail starting at `index`; empty when out of bounds.
    pub fn messages_from(&self, index: usize) -> &[Message] {
        self.messages.get(index..).unwrap_or_default()
    }

    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    /// Index of the nearest user message strictly before `index`.
    pub fn preceding_user_index(&self, index: usize) -> Option<usize> {
        self.messages
            .get(..index)?
            .iter()
            .rposition(|message| message.role == Role::User)
    }
}

impl FromIterator<Message> for ConversationTranscript {
    /// Builds a transcript, keeping only a leading system message.
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut transcript = Self::new();
        for message in iter {
            if message.role == Role::System && !transcript.is_empty() {
                tracing::warn!(message_id = message.id.0, "dropping misplaced system message");
                continue;
            }
            transcript.append(message);
        }
        transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConversationTranscript {
        [
            Message::system(MessageId::new(1), "sys"),
            Message::user(MessageId::new(2), "u1"),
            Message::assistant(MessageId::new(3), "a1"),
            Message::user(MessageId::new(4), "u2"),
            Message::assistant(MessageId::new(5), "a2"),
        ]
        .into_iter()
        .collect()
    }

    fn ids(transcript: &ConversationTranscript) -> Vec<u64> {
        transcript.messages().iter().map(|message| message.id.0).collect()
    }

    #[test]
    fn remove_suffix_returns_the_removed_tail() {
        let mut transcript = sample();
        let removed = transcript.remove_suffix_from(3);

        assert_eq!(ids(&transcript), vec![1, 2, 3]);
        assert_eq!(
            removed.iter().map(|message| message.id.0).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[test]
    fn remove_suffix_out_of_bounds_is_a_no_op() {
        let mut transcript = sample();
        assert!(transcript.remove_suffix_from(5).is_empty());
        assert!(transcript.remove_suffix_from(99).is_empty());
        assert_eq!(transcript.len(), 5);
    }

    #[test]
    fn index_of_uses_identity_not_content() {
        let mut transcript = sample();
        transcript.append(Message::user(MessageId::new(6), "u1"));

        assert_eq!(transcript.index_of(MessageId::new(2)), Some(1));
        assert_eq!(transcript.index_of(MessageId::new(6)), Some(5));
        assert_eq!(transcript.index_of(MessageId::new(42)), None);
    }

    #[test]
    fn messages_from_views_the_tail() {
        let transcript = sample();
        assert_eq!(transcript.messages_from(4).len(), 1);
        assert!(transcript.messages_from(5).is_empty());
        assert!(transcript.messages_from(10).is_empty());
    }

    #[test]
    fn preceding_user_index_scans_backwards() {
        let transcript = sample();
        assert_eq!(transcript.preceding_user_index(4), Some(3));
        assert_eq!(transcript.preceding_user_index(2), Some(1));
        assert_eq!(transcript.preceding_user_index(1), None);
        assert_eq!(transcript.preceding_user_index(0), None);
    }

    #[test]
    #[should_panic(expected = "system message")]
    fn appending_a_second_system_message_panics() {
        let mut transcript = sample();
        transcript.append(Message::system(MessageId::new(9), "again"));
    }

    #[test]
    fn collecting_drops_misplaced_system_messages() {
        let transcript: ConversationTranscript = [
            Message::user(MessageId::new(1), "hi"),
            Message::system(MessageId::new(2), "late system"),
        ]
        .into_iter()
        .collect();

        assert_eq!(ids(&transcript), vec![1]);
    }
}
