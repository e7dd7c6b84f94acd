use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::wire::StreamFragment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
        }
    }
}

/// Speaker role as understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: ProviderRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything the transport needs to open one response stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub agent_id: String,
    pub model_id: String,
    /// Local conversation key, echoed back on fragments when the transport has nothing better.
    pub conversation_id: String,
    /// Server-side session, once the server has assigned one.
    pub chat_session_id: Option<Uuid>,
    pub messages: Vec<ProviderMessage>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub tools: Vec<String>,
}

impl StreamRequest {
    pub fn new(
        agent_id: impl Into<String>,
        model_id: impl Into<String>,
        conversation_id: impl Into<String>,
        messages: Vec<ProviderMessage>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            model_id: model_id.into(),
            conversation_id: conversation_id.into(),
            chat_session_id: None,
            messages,
            preamble: None,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        }
    }

    pub fn with_chat_session_id(mut self, chat_session_id: Option<Uuid>) -> Self {
        self.chat_session_id = chat_session_id;
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("stream request for model '{model_id}' has no messages"))]
    EmptyMessageSet {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("failed to decode stream fragment on `{stage}`: {source}"))]
    DecodeFragment {
        stage: &'static str,
        source: serde_json::Error,
    },
}

/// Items delivered by a [`FragmentStream`], in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentEvent {
    /// `None` is a keep-alive and carries no state.
    Fragment(Option<StreamFragment>),
    Done,
    Error(String),
}

/// Receiving half of an open response stream.
///
/// Dropping it signals the transport worker to stop.
pub struct FragmentStream {
    events: mpsc::UnboundedReceiver<FragmentEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ProviderStreamHandle {
    pub stream: FragmentStream,
    pub worker: ProviderWorker,
}

impl FragmentStream {
    fn new(events: mpsc::UnboundedReceiver<FragmentEvent>, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<FragmentEvent> {
        self.events.recv().await
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Transport seam: turns a request into a lazy fragment stream plus the future that feeds it.
pub trait ChatService: Send + Sync {
    fn id(&self) -> &str;
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

/// Creates the channel pair a [`ChatService`] implementation writes fragments into.
///
/// The worker side gets the event sender and a cancellation receiver that fires when
/// the returned [`FragmentStream`] is dropped.
pub fn make_fragment_stream() -> (
    mpsc::UnboundedSender<FragmentEvent>,
    FragmentStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (event_tx, FragmentStream::new(event_rx, cancel_tx), cancel_rx)
}
