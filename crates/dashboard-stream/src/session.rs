use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tokio::sync::watch;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::coalescer::{ChunkCoalescer, FlushSchedule, FlushTick};
use crate::decoder::decode_stream;
use crate::errors::{StreamError, TransportError, failure_notice};
use crate::registry::{SessionLease, TargetKey};
use crate::target::StreamTarget;
use crate::transport::{ByteStream, StreamRequest, StreamTransport};

/// Handle used to request cancellation of a session.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests cancellation.
    ///
    /// The session observes the signal at its next suspension point and ends
    /// in `SessionState::Cancelled`.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Lifecycle of one streaming exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Request sent, no response byte observed yet.
    Sending,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed(TransportError),
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Completed => SessionState::Completed,
            Self::Cancelled => SessionState::Cancelled,
            Self::Failed(_) => SessionState::Failed,
        }
    }

    /// Maps the outcome onto the coordinator error type. A cancellation
    /// becomes `StreamError::Cancelled`.
    pub fn into_result(self) -> Result<(), StreamError> {
        match self {
            Self::Completed => Ok(()),
            Self::Cancelled => Err(StreamError::Cancelled),
            Self::Failed(err) => Err(StreamError::Transport(err)),
        }
    }
}

/// Summary returned when a session reaches a terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: uuid::Uuid,
    pub target: TargetKey,
    pub outcome: SessionOutcome,
    /// Number of payloads delivered to the target.
    pub flushes: usize,
    /// Characters delivered to the target.
    pub chars: usize,
}

type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// One streaming exchange (chat reply or model pull) bound to a target.
///
/// Created through `Coordinator::open_session`. `run` consumes the session, so
/// a finished session cannot be restarted; a new exchange needs a new session.
pub struct StreamSession {
    lease: SessionLease,
    tick: FlushTick,
    state: watch::Sender<SessionState>,
}

impl StreamSession {
    pub(crate) fn new(lease: SessionLease, tick: FlushTick) -> Self {
        let (state, _rx) = watch::channel(SessionState::Idle);
        Self { lease, tick, state }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.lease.session_id()
    }

    pub fn target(&self) -> &TargetKey {
        self.lease.key()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receives every state transition of this session.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.lease.abort_handle().clone()
    }

    /// Drives the exchange to a terminal state.
    ///
    /// The abort signal is checked at every suspension point: while the
    /// request is being sent, while waiting for the next chunk, and while
    /// waiting for a flush tick. Flushed content is never rolled back;
    /// unflushed content is discarded on cancellation and delivered before the
    /// failure notice on transport errors.
    pub async fn run<T>(
        self,
        transport: &dyn StreamTransport,
        request: StreamRequest,
        target: &mut T,
    ) -> SessionReport
    where
        T: StreamTarget + ?Sized,
    {
        let span = info_span!(
            "stream_session",
            session_id = %self.id(),
            target = %self.target(),
            kind = request.kind(),
            model = request.model(),
        );
        self.drive(transport, request, target).instrument(span).await
    }

    async fn drive<T>(
        self,
        transport: &dyn StreamTransport,
        request: StreamRequest,
        target: &mut T,
    ) -> SessionReport
    where
        T: StreamTarget + ?Sized,
    {
        let mut abort_rx = self.lease.abort_handle().subscribe();
        let mut delivery = Delivery::default();

        target.begin();
        let mut target = SettleOnDrop::new(target);
        self.transition(SessionState::Sending);

        let opened = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => None,
            opened = transport.open(&request) => Some(opened),
        };
        let mut body = match opened {
            None => return self.cancelled(target.disarm(), delivery, 0),
            Some(Err(err)) => return self.failed(target.disarm(), delivery, err),
            Some(Ok(body)) => body,
        };

        let first = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => None,
            first = body.next() => Some(first),
        };
        let body: ByteStream = match first {
            None => return self.cancelled(target.disarm(), delivery, 0),
            Some(Some(chunk)) => Box::pin(stream::iter([chunk]).chain(body)),
            Some(None) => body,
        };
        self.transition(SessionState::Streaming);

        let mut fragments = decode_stream(body).boxed();
        let mut coalescer = ChunkCoalescer::new();
        let mut tick: Option<TickFuture> = None;

        loop {
            tokio::select! {
                biased;
                _ = aborted(&mut abort_rx) => {
                    let discarded = coalescer.discard();
                    return self.cancelled(target.disarm(), delivery, discarded);
                }
                _ = async { if let Some(t) = tick.as_mut() { t.await } }, if tick.is_some() => {
                    tick = None;
                    if let Some(payload) = coalescer.flush() {
                        delivery.deliver(target.get(), &payload);
                    }
                }
                next = fragments.next() => match next {
                    Some(Ok(fragment)) => {
                        if coalescer.push(&fragment) == FlushSchedule::Schedule {
                            tick = Some(Box::pin(self.tick.wait()));
                        }
                    }
                    Some(Err(err)) => {
                        if let Some(payload) = coalescer.finish() {
                            delivery.deliver(target.get(), &payload);
                        }
                        return self.failed(target.disarm(), delivery, err);
                    }
                    None => {
                        if let Some(payload) = coalescer.finish() {
                            delivery.deliver(target.get(), &payload);
                        }
                        return self.completed(target.disarm(), delivery);
                    }
                }
            }
        }
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        debug!(from = %prev, to = %next, "session state");
    }

    fn completed<T: StreamTarget + ?Sized>(self, target: &mut T, delivery: Delivery) -> SessionReport {
        target.settle();
        info!(flushes = delivery.flushes, chars = delivery.chars, "stream completed");
        self.finish(SessionOutcome::Completed, delivery)
    }

    fn cancelled<T: StreamTarget + ?Sized>(
        self,
        target: &mut T,
        delivery: Delivery,
        discarded: usize,
    ) -> SessionReport {
        target.settle();
        info!(flushes = delivery.flushes, chars = delivery.chars, discarded, "stream cancelled");
        self.finish(SessionOutcome::Cancelled, delivery)
    }

    fn failed<T: StreamTarget + ?Sized>(
        self,
        target: &mut T,
        delivery: Delivery,
        err: TransportError,
    ) -> SessionReport {
        target.fail(&failure_notice(&err));
        warn!(error = %err, flushes = delivery.flushes, "stream failed");
        self.finish(SessionOutcome::Failed(err), delivery)
    }

    fn finish(self, outcome: SessionOutcome, delivery: Delivery) -> SessionReport {
        self.transition(outcome.state());
        SessionReport {
            session_id: self.id(),
            target: self.target().clone(),
            outcome,
            flushes: delivery.flushes,
            chars: delivery.chars,
        }
    }
}

/// Settles the target when the session future is dropped before it reaches a
/// terminal state, so the target never stays open without a writer.
struct SettleOnDrop<'a, T: StreamTarget + ?Sized> {
    target: &'a mut T,
    armed: bool,
}

impl<'a, T: StreamTarget + ?Sized> SettleOnDrop<'a, T> {
    fn new(target: &'a mut T) -> Self {
        Self {
            target,
            armed: true,
        }
    }

    fn get(&mut self) -> &mut T {
        &mut *self.target
    }

    /// Hands the target to a terminal step that settles or fails it itself.
    fn disarm(&mut self) -> &mut T {
        self.armed = false;
        &mut *self.target
    }
}

impl<T: StreamTarget + ?Sized> Drop for SettleOnDrop<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.target.settle();
            warn!("stream dropped before finishing; target settled");
        }
    }
}

#[derive(Default)]
struct Delivery {
    flushes: usize,
    chars: usize,
}

impl Delivery {
    fn deliver<T: StreamTarget + ?Sized>(&mut self, target: &mut T, payload: &str) {
        target.apply(payload);
        self.flushes += 1;
        self.chars += payload.chars().count();
        debug!(flush = self.flushes, len = payload.len(), "flushed to target");
    }
}

/// Resolves once the abort flag is set; never resolves otherwise.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}
