use quill_llm::{StreamFragment, is_placeholder_title};

/// First-writer-wins capture of a session title from a fragment stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleExtractor {
    title: String,
    has_captured_title: bool,
}

impl TitleExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a candidate title. Returns true only when this call captured it.
    pub fn observe(&mut self, candidate: Option<&str>) -> bool {
        if self.has_captured_title {
            return false;
        }

        let Some(candidate) = candidate else {
            return false;
        };
        if candidate.trim().is_empty() || is_placeholder_title(candidate) {
            return false;
        }

        self.title = candidate.to_string();
        self.has_captured_title = true;
        true
    }

    pub fn observe_fragment(&mut self, fragment: &StreamFragment) -> bool {
        self.observe(fragment.title.as_deref())
    }

    pub fn has_captured_title(&self) -> bool {
        self.has_captured_title
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Captured title, or an empty string when none arrived.
    pub fn into_title(self) -> String {
        self.title
    }
}
