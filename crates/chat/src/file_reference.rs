//! Inline `<file>NAME</file>` marker carried inside user message text.
//!
//! Only user messages are eligible. Detection is case-insensitive and the first
//! marker wins; written markers are always lowercase and placed at the front of the
//! content when newly added. Display helpers strip every marker, not just the first.

use std::sync::OnceLock;

use regex::{Captures, NoExpand, Regex};

use crate::message::{Message, Role};

fn file_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)<file>(.*?)</file>").expect("file tag pattern is valid")
    })
}

/// Same marker plus the blanks around it, so stripping can leave a single space.
fn padded_file_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)([ \t]*)<file>.*?</file>([ \t]*)")
            .expect("padded file tag pattern is valid")
    })
}

fn canonical_tag(filename: &str) -> String {
    format!("<file>{filename}</file>")
}

fn eligible(message: &Message) -> bool {
    match message.role {
        Role::User => true,
        Role::System | Role::Assistant => false,
    }
}

pub fn has_file(message: &Message) -> bool {
    eligible(message) && file_tag_pattern().is_match(&message.content)
}

/// Writes `filename` into the message's marker, replacing an existing one in place.
///
/// No-op for non-user messages.
pub fn add_file(message: &mut Message, filename: &str) {
    if !eligible(message) {
        return;
    }

    let tag = canonical_tag(filename);
    let pattern = file_tag_pattern();
    message.content = if pattern.is_match(&message.content) {
        pattern
            .replacen(&message.content, 1, NoExpand(&tag))
            .into_owned()
    } else {
        format!("{tag}{}", message.content)
    };
}

pub fn file_name(message: &Message) -> Option<&str> {
    if !eligible(message) {
        return None;
    }

    file_tag_pattern()
        .captures(&message.content)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

/// Message text with every marker removed.
pub fn content_without_file(message: &Message) -> String {
    if !has_file(message) {
        return message.content.clone();
    }

    strip_all_tags(&message.content)
}

/// Message text prefixed with a readable line naming the attached file.
pub fn content_with_file_display(message: &Message) -> String {
    let Some(name) = file_name(message) else {
        return message.content.clone();
    };

    format!("The file is: {name}\n{}", strip_all_tags(&message.content))
}

fn strip_all_tags(content: &str) -> String {
    padded_file_tag_pattern()
        .replace_all(content, |captures: &Captures<'_>| {
            if captures[1].is_empty() && captures[2].is_empty() {
                ""
            } else {
                " "
            }
        })
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageId;

    fn user(content: &str) -> Message {
        Message::user(MessageId::new(1), content)
    }

    #[test]
    fn replacing_a_file_leaves_exactly_one_tag() {
        let mut message = user("Please read this");
        add_file(&mut message, "a.pdf");
        add_file(&mut message, "b.pdf");

        assert_eq!(message.content, "<file>b.pdf</file>Please read this");
        assert_eq!(message.content.matches("<file>").count(), 1);
        assert!(!message.content.contains("a.pdf"));
    }

    #[test]
    fn adding_the_same_file_twice_is_idempotent() {
        let mut once = user("summarize");
        add_file(&mut once, "notes.txt");

        let mut twice = user("summarize");
        add_file(&mut twice, "notes.txt");
        add_file(&mut twice, "notes.txt");

        assert_eq!(once.content, twice.content);
    }

    #[test]
    fn replace_keeps_position_and_writes_lowercase_tag() {
        let mut message = user("see <FILE>old.txt</FILE> please");
        add_file(&mut message, "new.txt");
        assert_eq!(message.content, "see <file>new.txt</file> please");
    }

    #[test]
    fn filenames_with_dollar_signs_are_inserted_literally() {
        let mut message = user("<file>x</file>body");
        add_file(&mut message, "$1 budget.xlsx");
        assert_eq!(file_name(&message), Some("$1 budget.xlsx"));
    }

    #[test]
    fn non_user_roles_are_ignored() {
        for mut message in [
            Message::assistant(MessageId::new(2), "<file>a.pdf</file>text"),
            Message::system(MessageId::new(3), "<file>a.pdf</file>text"),
        ] {
            assert!(!has_file(&message));
            assert_eq!(file_name(&message), None);

            add_file(&mut message, "b.pdf");
            assert_eq!(message.content, "<file>a.pdf</file>text");
            assert_eq!(content_without_file(&message), "<file>a.pdf</file>text");
        }
    }

    #[test]
    fn content_without_file_round_trip() {
        let message = user("<file>report.pdf</file>Please summarize");
        assert_eq!(content_without_file(&message), "Please summarize");
        assert_eq!(file_name(&message), Some("report.pdf"));
    }

    #[test]
    fn detection_is_case_insensitive() {
        let message = user("<File>Data.CSV</fIlE> go");
        assert!(has_file(&message));
        assert_eq!(file_name(&message), Some("Data.CSV"));
    }

    #[test]
    fn first_tag_wins_but_display_strips_all() {
        let message = user("<file>first.md</file> body <file>second.md</file>");
        assert_eq!(file_name(&message), Some("first.md"));
        assert_eq!(content_without_file(&message), "body");
        assert_eq!(
            content_with_file_display(&message),
            "The file is: first.md\nbody"
        );
    }

    #[test]
    fn stripping_a_tag_between_words_leaves_one_space() {
        let message = user("a <file>x</file> b");
        assert_eq!(content_without_file(&message), "a b");

        let glued = user("see<file>x.txt</file> now");
        assert_eq!(content_without_file(&glued), "see now");
        assert_eq!(
            content_with_file_display(&user("before<file>x</file>after")),
            "The file is: x\nbeforeafter"
        );
    }

    #[test]
    fn content_without_tag_is_unchanged() {
        let message = user("  plain text ");
        assert!(!has_file(&message));
        assert_eq!(content_without_file(&message), "  plain text ");
        assert_eq!(content_with_file_display(&message), "  plain text ");
    }
}
