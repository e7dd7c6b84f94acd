//! Streamed-conversation engine: assembles responses fragment by fragment, keeps
//! per-conversation transcripts, and implements regeneration by truncation.

pub mod agent;
pub mod assembler;
pub mod error;
pub mod file_reference;
pub mod message;
pub mod presenter;
pub mod regeneration;
pub mod session;
pub mod title;
pub mod transcript;

pub use agent::AgentProfile;
pub use assembler::{AssembledResponse, AssemblerState, AssemblyUpdate, Channel, StreamAssembler};
pub use error::{ChatError, ChatResult};
pub use message::{
    ConversationId, Message, MessageId, MessageStatus, Role, StreamSessionId, StreamTarget,
    normalize_display,
};
pub use presenter::{
    MarkdownRenderer, MessageView, MessageViewList, PlainTextRenderer, PresentationContext,
    Presenter, RenderJob, ViewEvent,
};
pub use regeneration::{RegenerateFrom, RegenerationPlan};
pub use session::{ChatSession, Conversation, CycleEvent, CycleEventKind};
pub use title::TitleExtractor;
pub use transcript::ConversationTranscript;
