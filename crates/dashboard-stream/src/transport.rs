use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::DashboardConfig;
use crate::conversation::Message;
use crate::errors::{StreamError, TransportError, transport_from_reqwest};

/// Raw response body chunks in arrival order.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Body of a chat streaming call.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatRequest {
    pub model: String,
    /// Already windowed conversation plus the new user message.
    pub messages: Vec<Message>,
}

/// Body of a server-context chat call. The server prepends a system prompt
/// built from live server state, so only the new message is sent.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerChatRequest {
    pub message: String,
    pub model: String,
}

/// Body of a model pull (download progress) call.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PullRequest {
    pub model: String,
}

/// One streaming exchange request.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamRequest {
    Chat(ChatRequest),
    ServerChat(ServerChatRequest),
    Pull(PullRequest),
}

impl StreamRequest {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::ServerChat(_) => "server-chat",
            Self::Pull(_) => "pull",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Chat(req) => &req.model,
            Self::ServerChat(req) => &req.model,
            Self::Pull(req) => &req.model,
        }
    }
}

/// Opens streaming responses. Implemented over HTTP by `HttpTransport`; tests
/// plug in scripted byte streams.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    /// Sends the request and returns the response body as a byte stream once
    /// the response head has been accepted.
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError>;
}

/// reqwest-backed transport for the dashboard API (`/api/ai/chat`,
/// `/api/ai/server-chat`, `/api/ai/pull`).
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Builds a transport from dashboard configuration.
    ///
    /// The client has a connect timeout only: streamed bodies may stay open
    /// for as long as the server keeps producing tokens.
    pub fn new(config: &DashboardConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Builds a transport around an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn endpoint(&self, request: &StreamRequest) -> String {
        let path = match request {
            StreamRequest::Chat(_) => "/api/ai/chat",
            StreamRequest::ServerChat(_) => "/api/ai/server-chat",
            StreamRequest::Pull(_) => "/api/ai/pull",
        };
        format!("{}{path}", self.base_url)
    }
}

#[async_trait::async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        let url = self.endpoint(request);
        debug!(%url, kind = request.kind(), model = request.model(), "opening stream");

        let http_req = match request {
            StreamRequest::Chat(body) => self.client.post(&url).json(body),
            StreamRequest::ServerChat(body) => self.client.post(&url).json(body),
            StreamRequest::Pull(body) => self.client.post(&url).json(body),
        };
        let response = http_req
            .send()
            .await
            .map_err(|e| transport_from_reqwest(&e, false))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| transport_from_reqwest(&e, true)));
        Ok(Box::pin(stream))
    }
}
