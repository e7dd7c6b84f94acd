use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use uuid::Uuid;

use super::provider::{DecodeFragmentSnafu, ProviderResult};

/// Title the server assigns before it has generated a real one.
pub const SERVER_PLACEHOLDER_TITLE: &str = "Chat Session (Server)";
/// Title a client assigns to sessions it created locally.
pub const CLIENT_PLACEHOLDER_TITLE: &str = "Chat Session (Client)";

/// Returns true for titles that only mark a session as untitled.
pub fn is_placeholder_title(title: &str) -> bool {
    title == SERVER_PLACEHOLDER_TITLE || title == CLIENT_PLACEHOLDER_TITLE
}

/// Partial message carried by one fragment. Only the newly produced text is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentDelta {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// One element of a streamed response, as emitted by the inference service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFragment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub chat_session_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub delta: Option<FragmentDelta>,
    #[serde(default)]
    pub is_thinking: bool,
}

impl StreamFragment {
    /// Builds an answer-channel fragment.
    pub fn answer(text: impl Into<String>) -> Self {
        Self::with_text(text, false)
    }

    /// Builds a thinking-channel fragment.
    pub fn thinking(text: impl Into<String>) -> Self {
        Self::with_text(text, true)
    }

    fn with_text(text: impl Into<String>, is_thinking: bool) -> Self {
        Self {
            delta: Some(FragmentDelta {
                role: "assistant".to_string(),
                content: Some(text.into()),
            }),
            is_thinking,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_chat_session_id(mut self, chat_session_id: Uuid) -> Self {
        self.chat_session_id = Some(chat_session_id);
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    /// Text increment for the channel selected by `is_thinking`, empty when absent.
    pub fn delta_text(&self) -> &str {
        self.delta
            .as_ref()
            .and_then(|delta| delta.content.as_deref())
            .unwrap_or_default()
    }

    /// Keep-alive fragments carry neither text nor metadata.
    pub fn is_keep_alive(&self) -> bool {
        self.delta_text().is_empty()
            && self.title.as_deref().is_none_or(str::is_empty)
            && self.chat_session_id.is_none()
    }
}

/// Decodes one line of a newline-delimited fragment stream.
///
/// Blank lines and a literal `null` are keep-alives and decode to `None`.
pub fn decode_fragment_line(line: &str) -> ProviderResult<Option<StreamFragment>> {
    let line = line.trim();
    if line.is_empty() || line == "null" {
        return Ok(None);
    }

    let fragment: Option<StreamFragment> =
        serde_json::from_str(line).context(DecodeFragmentSnafu {
            stage: "decode-fragment-line",
        })?;
    Ok(fragment.filter(|fragment| !fragment.is_keep_alive()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_wire_object() {
        let line = r#"{"id":"f-1","chat_session_id":"4f9d2f4e-4a4e-4c1b-9a57-0d1f0c7e2b11","title":"Refund request","conversation_id":"c-9","delta":{"role":"assistant","content":"Hello"},"is_thinking":false}"#;

        let fragment = decode_fragment_line(line)
            .expect("valid fragment line")
            .expect("non keep-alive fragment");

        assert_eq!(fragment.id, "f-1");
        assert_eq!(fragment.title.as_deref(), Some("Refund request"));
        assert_eq!(fragment.conversation_id, "c-9");
        assert_eq!(fragment.delta_text(), "Hello");
        assert!(!fragment.is_thinking);
        assert!(fragment.chat_session_id.is_some());
    }

    #[test]
    fn null_chat_session_id_is_accepted() {
        let line = r#"{"id":"f-2","chat_session_id":null,"title":"","conversation_id":"c","delta":{"role":"assistant","content":"hm"},"is_thinking":true}"#;

        let fragment = decode_fragment_line(line)
            .expect("valid fragment line")
            .expect("fragment with text");

        assert!(fragment.chat_session_id.is_none());
        assert!(fragment.is_thinking);
        assert_eq!(fragment.delta_text(), "hm");
    }

    #[test]
    fn blank_null_and_empty_lines_are_keep_alives() {
        assert_eq!(decode_fragment_line("").expect("blank"), None);
        assert_eq!(decode_fragment_line("   ").expect("spaces"), None);
        assert_eq!(decode_fragment_line("null").expect("null"), None);
        assert_eq!(
            decode_fragment_line(r#"{"delta":{"role":"assistant","content":""}}"#)
                .expect("empty delta"),
            None
        );
    }

    #[test]
    fn malformed_line_reports_decode_error() {
        let error = decode_fragment_line("{not json").expect_err("malformed line");
        assert!(error.to_string().contains("decode"));
    }

    #[test]
    fn placeholder_titles_are_recognized() {
        assert!(is_placeholder_title("Chat Session (Server)"));
        assert!(is_placeholder_title("Chat Session (Client)"));
        assert!(!is_placeholder_title("Chat Session"));
    }
}
