//! Transport-facing types for streamed chat responses.
//!
//! The chat core only sees [`StreamFragment`]s arriving through a [`FragmentStream`];
//! how a [`ChatService`] produces them is its own business.

mod provider;
mod rig_adapter;
mod wire;

use std::sync::Arc;

pub use provider::{
    ChatService, FragmentEvent, FragmentStream, ProviderConfig, ProviderError, ProviderMessage,
    ProviderResult, ProviderRole, ProviderStreamHandle, ProviderWorker, StreamRequest,
    make_fragment_stream,
};
pub use rig_adapter::{DEFAULT_OPENAI_MODEL, RIG_OPENAI_PROVIDER_ID, RigChatService};
pub use wire::{
    CLIENT_PLACEHOLDER_TITLE, FragmentDelta, SERVER_PLACEHOLDER_TITLE, StreamFragment,
    decode_fragment_line, is_placeholder_title,
};

pub fn create_service(mut config: ProviderConfig) -> ProviderResult<Arc<dyn ChatService>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigChatService::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-service",
            provider_id: config.provider_id,
        }),
    }
}
