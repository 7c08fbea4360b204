use std::sync::{Arc, Mutex, PoisonError};

use crate::conversation::{ConversationContext, Message};
use crate::errors::StreamError;
use crate::progress::ProgressTracker;

/// Mutable destination of streamed content.
///
/// A session calls `begin` once before the request is sent, `apply` once per
/// flush, then exactly one of `settle` (completed or cancelled) or `fail`.
pub trait StreamTarget: Send {
    fn begin(&mut self);
    fn apply(&mut self, payload: &str);
    fn fail(&mut self, notice: &str);
    fn settle(&mut self);
}

/// A target that can also build the outgoing chat payload.
pub trait ChatTarget: StreamTarget {
    fn compose(&mut self, text: &str) -> Result<Vec<Message>, StreamError>;
}

impl StreamTarget for ConversationContext {
    fn begin(&mut self) {
        self.begin_assistant();
    }

    fn apply(&mut self, payload: &str) {
        self.append_assistant(payload);
    }

    fn fail(&mut self, notice: &str) {
        self.fail_assistant(notice);
    }

    fn settle(&mut self) {
        self.settle_assistant();
    }
}

impl ChatTarget for ConversationContext {
    fn compose(&mut self, text: &str) -> Result<Vec<Message>, StreamError> {
        ConversationContext::compose(self, text)
    }
}

impl StreamTarget for ProgressTracker {
    fn begin(&mut self) {
        self.start();
    }

    fn apply(&mut self, payload: &str) {
        ProgressTracker::apply(self, payload);
    }

    fn fail(&mut self, notice: &str) {
        ProgressTracker::fail(self, notice);
    }

    fn settle(&mut self) {
        self.finish();
    }
}

/// Targets shared with a rendering task. Each call holds the lock only for
/// the duration of one update.
impl<T: StreamTarget> StreamTarget for Arc<Mutex<T>> {
    fn begin(&mut self) {
        self.lock().unwrap_or_else(PoisonError::into_inner).begin();
    }

    fn apply(&mut self, payload: &str) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(payload);
    }

    fn fail(&mut self, notice: &str) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail(notice);
    }

    fn settle(&mut self) {
        self.lock().unwrap_or_else(PoisonError::into_inner).settle();
    }
}

impl<T: ChatTarget> ChatTarget for Arc<Mutex<T>> {
    fn compose(&mut self, text: &str) -> Result<Vec<Message>, StreamError> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .compose(text)
    }
}
