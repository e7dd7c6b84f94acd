//! Incremental reconstruction of one assistant response from streamed fragments.
//!
//! Each fragment's delta lands in exactly one of two independent buffers, chosen by
//! its `is_thinking` flag, strictly in delivery order. Keep-alive fragments (`None`
//! or empty) never touch accumulated state.

use quill_llm::StreamFragment;

use crate::title::TitleExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblerState {
    #[default]
    Idle,
    Streaming,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Thinking,
    Content,
}

/// Snapshot published after every applied fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyUpdate {
    pub channel: Channel,
    pub thinking: String,
    pub content: String,
    /// Sticky: true once any thinking fragment arrived in this cycle.
    pub is_thinking: bool,
    /// True while the most recent fragment belonged to the thinking channel.
    pub is_collecting_thoughts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledResponse {
    pub thinking: String,
    pub content: String,
    /// Empty when the stream never carried a real title.
    pub title: String,
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    state: AssemblerState,
    thinking: String,
    content: String,
    titles: TitleExtractor,
    is_thinking: bool,
    is_collecting_thoughts: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn title(&self) -> &str {
        self.titles.title()
    }

    pub fn is_thinking(&self) -> bool {
        self.is_thinking
    }

    pub fn is_collecting_thoughts(&self) -> bool {
        self.is_collecting_thoughts
    }

    /// Enters `Streaming` with empty buffers and a fresh title capture.
    pub fn begin(&mut self) {
        *self = Self {
            state: AssemblerState::Streaming,
            ..Self::default()
        };
    }

    /// Applies one fragment. Returns the resulting snapshot when a buffer changed.
    pub fn apply(&mut self, fragment: Option<&StreamFragment>) -> Option<AssemblyUpdate> {
        if self.state != AssemblerState::Streaming {
            tracing::warn!(state = ?self.state, "fragment ignored outside of a streaming cycle");
            return None;
        }

        let fragment = fragment?;
        if self.titles.observe_fragment(fragment) {
            tracing::info!(title = %self.titles.title(), "captured session title from stream");
        }

        let delta = fragment.delta_text();
        if delta.is_empty() {
            return None;
        }

        let channel = if fragment.is_thinking {
            append_left_trimmed(&mut self.thinking, delta);
            self.is_thinking = true;
            self.is_collecting_thoughts = true;
            Channel::Thinking
        } else {
            append_left_trimmed(&mut self.content, delta);
            self.is_collecting_thoughts = false;
            Channel::Content
        };

        Some(self.snapshot(channel))
    }

    fn snapshot(&self, channel: Channel) -> AssemblyUpdate {
        AssemblyUpdate {
            channel,
            thinking: self.thinking.clone(),
            content: self.content.clone(),
            is_thinking: self.is_thinking,
            is_collecting_thoughts: self.is_collecting_thoughts,
        }
    }

    /// Moves to `Done` and hands back the buffers and captured title.
    pub fn finish(&mut self) -> AssembledResponse {
        self.state = AssemblerState::Done;
        self.is_collecting_thoughts = false;
        AssembledResponse {
            thinking: std::mem::take(&mut self.thinking),
            content: std::mem::take(&mut self.content),
            title: std::mem::take(&mut self.titles).into_title(),
        }
    }
}

fn append_left_trimmed(buffer: &mut String, delta: &str) {
    buffer.push_str(delta);
    let leading = buffer.len() - buffer.trim_start().len();
    if leading > 0 {
        buffer.drain(..leading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thinking(text: &str) -> Option<StreamFragment> {
        Some(StreamFragment::thinking(text))
    }

    fn answer(text: &str) -> Option<StreamFragment> {
        Some(StreamFragment::answer(text))
    }

    fn assemble(fragments: Vec<Option<StreamFragment>>) -> AssembledResponse {
        let mut assembler = StreamAssembler::new();
        assembler.begin();
        for fragment in &fragments {
            assembler.apply(fragment.as_ref());
        }
        assembler.finish()
    }

    #[test]
    fn channels_accumulate_independently_in_order() {
        let response = assemble(vec![thinking("Hmm "), thinking("ok"), answer("Answer")]);

        assert_eq!(response.thinking, "Hmm ok");
        assert_eq!(response.content, "Answer");
    }

    #[test]
    fn interleaved_channels_never_cross() {
        let response = assemble(vec![
            thinking("step one. "),
            answer("Part A, "),
            thinking("step two."),
            answer("part B."),
        ]);

        assert_eq!(response.thinking, "step one. step two.");
        assert_eq!(response.content, "Part A, part B.");
    }

    #[test]
    fn keep_alives_do_not_change_the_result() {
        let with_nulls = assemble(vec![
            None,
            thinking("a"),
            None,
            Some(StreamFragment::default()),
            answer("b"),
            None,
            answer("c"),
        ]);
        let without_nulls = assemble(vec![thinking("a"), answer("b"), answer("c")]);

        assert_eq!(with_nulls, without_nulls);
    }

    #[test]
    fn leading_whitespace_from_first_chunk_is_trimmed() {
        let response = assemble(vec![answer("\n\n  Hello"), answer(" world")]);
        assert_eq!(response.content, "Hello world");
    }

    #[test]
    fn completion_returns_first_real_title() {
        let response = assemble(vec![
            Some(StreamFragment::answer("a").with_title("")),
            Some(StreamFragment::answer("b").with_title("Chat Session (Server)")),
            Some(StreamFragment::answer("c").with_title("Refund request")),
            Some(StreamFragment::answer("d").with_title("Other title")),
        ]);

        assert_eq!(response.title, "Refund request");
        assert_eq!(response.content, "abcd");
    }

    #[test]
    fn updates_track_thinking_flags() {
        let mut assembler = StreamAssembler::new();
        assembler.begin();
        let first = assembler.apply(thinking("x").as_ref()).expect("thinking update");
        let second = assembler.apply(answer("y").as_ref()).expect("answer update");

        assert_eq!(first.channel, Channel::Thinking);
        assert!(first.is_thinking && first.is_collecting_thoughts);
        assert_eq!(second.channel, Channel::Content);
        assert!(second.is_thinking);
        assert!(!second.is_collecting_thoughts);
        assert_eq!(assembler.apply(None), None);

        assembler.finish();
        assert_eq!(assembler.state(), AssemblerState::Done);
        assert_eq!(assembler.apply(answer("late").as_ref()), None);
    }

    #[test]
    fn apply_outside_streaming_is_ignored() {
        let mut assembler = StreamAssembler::new();
        assert_eq!(assembler.apply(answer("early").as_ref()), None);
        assert_eq!(assembler.content(), "");
    }

    #[test]
    fn begin_resets_previous_cycle() {
        let mut assembler = StreamAssembler::new();
        assembler.begin();
        assembler.apply(Some(&StreamFragment::thinking("old").with_title("Old")));
        assembler.begin();

        assert_eq!(assembler.thinking(), "");
        assert_eq!(assembler.title(), "");
        assert!(!assembler.is_thinking());
        assert_eq!(assembler.state(), AssemblerState::Streaming);
    }
}
