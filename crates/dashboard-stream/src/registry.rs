use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::errors::StreamError;
use crate::session::AbortHandle;

/// Destination a session streams into.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetKey {
    /// A chat conversation, by conversation id.
    Chat(String),
    /// A model download, by model name.
    Download(String),
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(id) => write!(f, "chat:{id}"),
            Self::Download(model) => write!(f, "download:{model}"),
        }
    }
}

/// What to do when a session is requested for a target that already has one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActivePolicy {
    /// Refuse the new session with `StreamError::TargetBusy`.
    Reject,
    /// Abort the running session and wait for it to retire first.
    #[default]
    CancelPrevious,
}

impl FromStr for ActivePolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "cancel-previous" | "cancel_previous" | "replace" => Ok(Self::CancelPrevious),
            other => Err(StreamError::Config(format!(
                "unknown active session policy {other:?} (expected reject or cancel-previous)"
            ))),
        }
    }
}

struct ActiveEntry {
    session_id: uuid::Uuid,
    abort: AbortHandle,
    retired: watch::Receiver<bool>,
}

/// Tracks the single active session per target.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashMap<TargetKey, ActiveEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` for a new session.
    ///
    /// With `CancelPrevious` the prior session is aborted and this call waits
    /// until its lease is released, so the prior session can no longer touch
    /// the target when this returns. A prior session that was opened but is
    /// never run keeps its lease until it is dropped.
    pub async fn acquire(
        &self,
        key: TargetKey,
        policy: ActivePolicy,
    ) -> Result<SessionLease, StreamError> {
        loop {
            let mut prior = {
                let mut active = self.lock();
                match active.get(&key) {
                    None => {
                        let session_id = uuid::Uuid::new_v4();
                        let abort = AbortHandle::new();
                        let (retired_tx, retired_rx) = watch::channel(false);
                        active.insert(
                            key.clone(),
                            ActiveEntry {
                                session_id,
                                abort: abort.clone(),
                                retired: retired_rx,
                            },
                        );
                        return Ok(SessionLease {
                            registry: self.clone(),
                            key,
                            session_id,
                            abort,
                            retired: retired_tx,
                        });
                    }
                    Some(_) if policy == ActivePolicy::Reject => {
                        return Err(StreamError::TargetBusy {
                            target: key.to_string(),
                        });
                    }
                    Some(entry) => {
                        debug!(target = %key, prior = %entry.session_id, "cancelling previous session");
                        entry.abort.abort();
                        entry.retired.clone()
                    }
                }
            };
            // Sender dropped also means retired.
            let _ = prior.wait_for(|retired| *retired).await;
        }
    }

    /// Whether a session currently holds `key`.
    pub fn is_active(&self, key: &TargetKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Aborts the session holding `key`, if any. Returns whether one was found.
    pub fn cancel(&self, key: &TargetKey) -> bool {
        match self.lock().get(key) {
            Some(entry) => {
                entry.abort.abort();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, key: &TargetKey, session_id: uuid::Uuid) {
        let mut active = self.lock();
        if active
            .get(key)
            .is_some_and(|entry| entry.session_id == session_id)
        {
            active.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TargetKey, ActiveEntry>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive claim on a target, released on drop.
pub struct SessionLease {
    registry: SessionRegistry,
    key: TargetKey,
    session_id: uuid::Uuid,
    abort: AbortHandle,
    retired: watch::Sender<bool>,
}

impl SessionLease {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn key(&self) -> &TargetKey {
        &self.key
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.session_id);
        self.retired.send_replace(true);
    }
}
