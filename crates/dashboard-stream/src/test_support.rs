use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use futures::stream;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::conversation::Message;
use crate::errors::{StreamError, TransportError};
use crate::target::{ChatTarget, StreamTarget};
use crate::transport::{ByteStream, ChatRequest, StreamRequest, StreamTransport};

pub(crate) type ChunkSender = mpsc::UnboundedSender<Result<Bytes, TransportError>>;

enum Behavior {
    Body(Vec<Vec<u8>>, Option<TransportError>),
    Channel(mpsc::UnboundedReceiver<Result<Bytes, TransportError>>),
    Refuse(TransportError),
    Hang,
}

/// Scripted transport: each `open` consumes the next queued behavior.
#[derive(Default)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Behavior>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(self, behavior: Behavior) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .push_back(behavior);
        self
    }

    pub(crate) fn body(self, chunks: Vec<Vec<u8>>) -> Self {
        self.push(Behavior::Body(chunks, None))
    }

    pub(crate) fn body_then_error(self, chunks: Vec<Vec<u8>>, err: TransportError) -> Self {
        self.push(Behavior::Body(chunks, Some(err)))
    }

    pub(crate) fn refuse(self, err: TransportError) -> Self {
        self.push(Behavior::Refuse(err))
    }

    pub(crate) fn hang(self) -> Self {
        self.push(Behavior::Hang)
    }

    /// Body fed chunk by chunk from the returned sender; dropping the sender
    /// ends the body.
    pub(crate) fn channel(self) -> (Self, ChunkSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.push(Behavior::Channel(rx)), tx)
    }

    pub(crate) fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait::async_trait]
impl StreamTransport for FakeTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let behavior = self.script.lock().expect("script lock").pop_front();
        match behavior {
            Some(Behavior::Body(chunks, trailing_err)) => {
                let items = chunks
                    .into_iter()
                    .map(|c| Ok::<_, TransportError>(Bytes::from(c)))
                    .chain(trailing_err.map(Err));
                Ok(Box::pin(stream::iter(items.collect::<Vec<_>>())))
            }
            Some(Behavior::Channel(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
            Some(Behavior::Refuse(err)) => Err(err),
            Some(Behavior::Hang) => std::future::pending().await,
            None => Err(TransportError::connect("no scripted response")),
        }
    }
}

pub(crate) fn chat_request() -> StreamRequest {
    StreamRequest::Chat(ChatRequest {
        model: "test-model".into(),
        messages: vec![Message::user("hi")],
    })
}

/// Target that records every call a session makes.
#[derive(Debug, Default)]
pub(crate) struct RecordingTarget {
    pub began: bool,
    pub payloads: Vec<String>,
    pub failure: Option<String>,
    pub settled: bool,
}

impl StreamTarget for RecordingTarget {
    fn begin(&mut self) {
        self.began = true;
    }

    fn apply(&mut self, payload: &str) {
        self.payloads.push(payload.to_string());
    }

    fn fail(&mut self, notice: &str) {
        self.failure = Some(notice.to_string());
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl ChatTarget for RecordingTarget {
    fn compose(&mut self, text: &str) -> Result<Vec<Message>, StreamError> {
        Ok(vec![Message::user(text)])
    }
}

/// Serves exactly one HTTP/1.1 response on a local port. Returns the base URL
/// and a handle resolving to the raw request text.
pub(crate) async fn serve_once(
    response: impl Into<Vec<u8>>,
) -> (String, tokio::task::JoinHandle<String>) {
    let response = response.into();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0_u8; 8192];
        let mut request = Vec::new();
        loop {
            let n = socket.read(&mut buf).await.expect("read");
            request.extend_from_slice(&buf[..n]);
            if n == 0 || request_complete(&request) {
                break;
            }
        }
        socket.write_all(&response).await.expect("write");
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&request).into_owned()
    });
    (format!("http://{addr}"), handle)
}

/// A `200 OK` response carrying `body` as JSON.
pub(crate) fn json_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some((head, body)) = text.split_once("\r\n\r\n") else {
        return false;
    };
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    body.len() >= length
}
