use quill_llm::ProviderError;
use snafu::Snafu;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("no agent is selected; cannot {stage}"))]
    NoActiveAgent { stage: &'static str },
    #[snafu(display("no chat service is configured; cannot {stage}"))]
    ServiceNotConfigured { stage: &'static str },
    #[snafu(display("no conversation is open; cannot {stage}"))]
    NoActiveConversation { stage: &'static str },
    #[snafu(display("message is empty; nothing to {stage}"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("failed to open response stream on `{stage}`: {source}"))]
    OpenStream {
        stage: &'static str,
        source: ProviderError,
    },
}
