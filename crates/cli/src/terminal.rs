//! Line-oriented rendering of view events.
//!
//! Streaming rows print incrementally: each update emits only the text that was
//! not printed yet, so the terminal reads like a live response.

use quill_chat::{MessageId, MessageView, MessageViewList, Role, ViewEvent};

pub struct TerminalView {
    list: MessageViewList,
    show_thoughts: bool,
    streaming: Option<(MessageId, String)>,
}

impl TerminalView {
    pub fn new(show_thoughts: bool) -> Self {
        Self {
            list: MessageViewList::new(),
            show_thoughts,
            streaming: None,
        }
    }

    /// Applies the event to the mirrored list and returns what should be printed.
    pub fn render(&mut self, event: ViewEvent) -> String {
        let text = match &event {
            ViewEvent::Reset { title, entries, .. } => {
                self.streaming = None;
                let mut text = format!("== {title} ==\n");
                for entry in entries {
                    text.push_str(&self.finished_row(entry));
                }
                text
            }
            ViewEvent::Appended(view) => match view.role {
                Role::Assistant if !view.is_loaded => {
                    self.streaming = Some((view.message_id, String::new()));
                    "assistant> ".to_string()
                }
                _ => self.finished_row(view),
            },
            ViewEvent::Updated(view) => self.updated_row(view),
            ViewEvent::Truncated { removed, .. } => {
                if self
                    .streaming
                    .as_ref()
                    .is_some_and(|(id, _)| removed.contains(id))
                {
                    self.streaming = None;
                    format!("\n[discarded {} message(s)]\n", removed.len())
                } else {
                    format!("[discarded {} message(s)]\n", removed.len())
                }
            }
            ViewEvent::TitleChanged { title, .. } => format!("[title: {title}]\n"),
            ViewEvent::Notice(text) => format!("! {text}\n"),
        };

        self.list.apply(event);
        text
    }

    fn updated_row(&mut self, view: &MessageView) -> String {
        let Some((message_id, printed)) = self.streaming.as_mut() else {
            return self.failure_line(view);
        };
        if *message_id != view.message_id {
            return self.failure_line(view);
        }

        let mut text = match view.rendered.strip_prefix(printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n{}", view.rendered),
        };
        printed.clone_from(&view.rendered);

        if view.is_loaded {
            self.streaming = None;
            text.push('\n');
            text.push_str(&self.thoughts_block(view));
            text.push_str(&self.failure_line(view));
        }
        text
    }

    fn finished_row(&self, view: &MessageView) -> String {
        let label = match view.role {
            Role::System => "system",
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        let mut text = format!("{label}> {}\n", view.rendered);
        text.push_str(&self.thoughts_block(view));
        text.push_str(&self.failure_line(view));
        text
    }

    fn thoughts_block(&self, view: &MessageView) -> String {
        match (&view.rendered_thoughts, self.show_thoughts) {
            (Some(thoughts), true) => format!("  (thoughts) {thoughts}\n"),
            _ => String::new(),
        }
    }

    fn failure_line(&self, view: &MessageView) -> String {
        view.error
            .as_ref()
            .map(|error| format!("  [failed: {error}]\n"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use quill_chat::ConversationId;

    use super::*;

    fn assistant_view(id: u64, rendered: &str, is_loaded: bool) -> MessageView {
        MessageView {
            message_id: MessageId::new(id),
            role: Role::Assistant,
            rendered: rendered.to_string(),
            rendered_thoughts: None,
            is_loaded,
            is_thinking: false,
            is_collecting_thoughts: false,
            error: None,
        }
    }

    #[test]
    fn streaming_updates_print_only_new_text() {
        let mut terminal = TerminalView::new(false);
        let mut output = String::new();
        output.push_str(&terminal.render(ViewEvent::Appended(assistant_view(1, "", false))));
        output.push_str(&terminal.render(ViewEvent::Updated(assistant_view(1, "Hel", false))));
        output.push_str(&terminal.render(ViewEvent::Updated(assistant_view(1, "Hello", false))));
        output.push_str(&terminal.render(ViewEvent::Updated(assistant_view(1, "Hello!", true))));

        assert_eq!(output, "assistant> Hello!\n");
        assert_eq!(terminal.list.entries()[0].rendered, "Hello!");
    }

    #[test]
    fn failed_rows_and_thoughts_are_reported() {
        let mut terminal = TerminalView::new(true);
        terminal.render(ViewEvent::Appended(assistant_view(2, "", false)));

        let mut last = assistant_view(2, "partial", true);
        last.rendered_thoughts = Some("checking".to_string());
        last.error = Some("connection reset".to_string());

        assert_eq!(
            terminal.render(ViewEvent::Updated(last)),
            "partial\n  (thoughts) checking\n  [failed: connection reset]\n"
        );
    }

    #[test]
    fn reset_prints_every_row_under_the_title() {
        let mut terminal = TerminalView::new(false);
        let output = terminal.render(ViewEvent::Reset {
            conversation_id: ConversationId::new_v4(),
            title: "Refund request".to_string(),
            entries: vec![assistant_view(3, "Hi there", true)],
        });

        assert_eq!(output, "== Refund request ==\nassistant> Hi there\n");
    }

    #[test]
    fn cancelling_a_streaming_row_ends_the_line() {
        let mut terminal = TerminalView::new(false);
        terminal.render(ViewEvent::Appended(assistant_view(4, "", false)));
        terminal.render(ViewEvent::Updated(assistant_view(4, "half", false)));

        let output = terminal.render(ViewEvent::Truncated {
            from_index: 2,
            removed: vec![MessageId::new(4)],
        });
        assert_eq!(output, "\n[discarded 1 message(s)]\n");
        assert!(terminal.list.entries().is_empty());
    }
}
