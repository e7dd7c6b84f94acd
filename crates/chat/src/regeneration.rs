//! Truncation planning for "regenerate" requests.
//!
//! A plan names where the transcript is cut and which user turn is re-issued. The
//! session applies it only after every precondition for starting a new cycle holds,
//! so a refused regeneration never leaves a half-truncated transcript behind.

use crate::message::{Message, MessageId, Role};
use crate::transcript::ConversationTranscript;

/// Which message the user asked to regenerate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateFrom {
    /// Keep this user turn, drop everything after it.
    User(MessageId),
    /// Drop this assistant answer and everything after it, re-asking the nearest user turn before it.
    Assistant(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegenerationPlan {
    /// First index removed from the transcript.
    pub truncate_from: usize,
    /// User turn whose content drives the new response.
    pub reissue: MessageId,
}

impl RegenerationPlan {
    /// Computes the plan, or `None` when the request cannot apply to this transcript.
    pub fn for_request(
        transcript: &ConversationTranscript,
        request: RegenerateFrom,
    ) -> Option<Self> {
        match request {
            RegenerateFrom::User(id) => Self::from_user(transcript, id),
            RegenerateFrom::Assistant(id) => Self::from_assistant(transcript, id),
        }
    }

    fn from_user(transcript: &ConversationTranscript, id: MessageId) -> Option<Self> {
        let index = transcript.index_of(id)?;
        if transcript.get(index)?.role != Role::User {
            return None;
        }

        Some(Self {
            truncate_from: index + 1,
            reissue: id,
        })
    }

    fn from_assistant(transcript: &ConversationTranscript, id: MessageId) -> Option<Self> {
        let index = transcript.index_of(id)?;
        if index == 0 || transcript.get(index)?.role != Role::Assistant {
            return None;
        }

        let user_index = transcript.preceding_user_index(index)?;
        let reissue = transcript.get(user_index)?.id;
        Some(Self {
            truncate_from: index,
            reissue,
        })
    }

    /// Messages this plan would discard.
    pub fn discarded<'a>(&self, transcript: &'a ConversationTranscript) -> &'a [Message] {
        transcript.messages_from(self.truncate_from)
    }

    /// Cuts the transcript, returning the removed messages.
    pub fn apply(&self, transcript: &mut ConversationTranscript) -> Vec<Message> {
        transcript.remove_suffix_from(self.truncate_from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYS: MessageId = MessageId::new(1);
    const U1: MessageId = MessageId::new(2);
    const A1: MessageId = MessageId::new(3);
    const U2: MessageId = MessageId::new(4);
    const A2: MessageId = MessageId::new(5);

    fn sample() -> ConversationTranscript {
        [
            Message::system(SYS, "sys"),
            Message::user(U1, "u1"),
            Message::assistant(A1, "a1"),
            Message::user(U2, "u2"),
            Message::assistant(A2, "a2"),
        ]
        .into_iter()
        .collect()
    }

    fn ids(transcript: &ConversationTranscript) -> Vec<MessageId> {
        transcript.messages().iter().map(|message| message.id).collect()
    }

    #[test]
    fn from_user_keeps_the_user_turn() {
        let mut transcript = sample();
        let plan = RegenerationPlan::for_request(&transcript, RegenerateFrom::User(U2))
            .expect("user message present");

        assert_eq!(plan.reissue, U2);
        assert_eq!(plan.discarded(&transcript).len(), 1);
        plan.apply(&mut transcript);
        assert_eq!(ids(&transcript), vec![SYS, U1, A1, U2]);
    }

    #[test]
    fn from_assistant_drops_answer_and_everything_after() {
        let mut transcript = sample();
        let plan = RegenerationPlan::for_request(&transcript, RegenerateFrom::Assistant(A1))
            .expect("assistant message with preceding user turn");

        assert_eq!(plan.reissue, U1);
        let removed = plan.apply(&mut transcript);
        assert_eq!(ids(&transcript), vec![SYS, U1]);
        assert_eq!(removed.len(), 3);
    }

    #[test]
    fn missing_targets_produce_no_plan() {
        let transcript = sample();
        let missing = MessageId::new(77);
        assert_eq!(
            RegenerationPlan::for_request(&transcript, RegenerateFrom::User(missing)),
            None
        );
        assert_eq!(
            RegenerationPlan::for_request(&transcript, RegenerateFrom::Assistant(missing)),
            None
        );
    }

    #[test]
    fn assistant_without_preceding_user_turn_is_a_no_op() {
        let leading_answer: ConversationTranscript =
            [Message::assistant(A1, "greeting")].into_iter().collect();
        assert_eq!(
            RegenerationPlan::for_request(&leading_answer, RegenerateFrom::Assistant(A1)),
            None
        );

        let after_system: ConversationTranscript =
            [Message::system(SYS, "sys"), Message::assistant(A1, "greeting")]
                .into_iter()
                .collect();
        assert_eq!(
            RegenerationPlan::for_request(&after_system, RegenerateFrom::Assistant(A1)),
            None
        );
    }

    #[test]
    fn role_mismatch_is_rejected() {
        let transcript = sample();
        assert_eq!(
            RegenerationPlan::for_request(&transcript, RegenerateFrom::User(A1)),
            None
        );
        assert_eq!(
            RegenerationPlan::for_request(&transcript, RegenerateFrom::Assistant(U1)),
            None
        );
    }
}
