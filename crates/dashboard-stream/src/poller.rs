use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::collaborator::{AiStatus, CollaboratorClient, ServiceStatus, SystemResources};
use crate::errors::StreamError;

/// One independently fetched status source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollTarget {
    Services,
    Resources,
    Ai,
}

impl PollTarget {
    pub const ALL: [PollTarget; 3] = [Self::Services, Self::Resources, Self::Ai];
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Services(Vec<ServiceStatus>),
    Resources(SystemResources),
    Ai(AiStatus),
}

/// Fetches snapshots for the poller.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, target: PollTarget) -> Result<Snapshot, StreamError>;
}

#[async_trait::async_trait]
impl StatusSource for CollaboratorClient {
    async fn fetch(&self, target: PollTarget) -> Result<Snapshot, StreamError> {
        match target {
            PollTarget::Services => self.status().await.map(Snapshot::Services),
            PollTarget::Resources => self.resources().await.map(Snapshot::Resources),
            PollTarget::Ai => self.ai_status().await.map(Snapshot::Ai),
        }
    }
}

/// Latest known data for one target.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct PollEntry {
    /// Last successful snapshot; kept when later fetches fail.
    pub snapshot: Option<Snapshot>,
    /// Error of the most recent fetch, cleared on success.
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct PollerState {
    pub entries: HashMap<PollTarget, PollEntry>,
    pub rounds: u64,
}

impl PollerState {
    pub fn entry(&self, target: PollTarget) -> Option<&PollEntry> {
        self.entries.get(&target)
    }

    fn record(&mut self, target: PollTarget, result: Result<Snapshot, StreamError>) {
        let entry = self.entries.entry(target).or_default();
        match result {
            Ok(snapshot) => {
                entry.snapshot = Some(snapshot);
                entry.last_error = None;
                entry.updated_at = Some(Utc::now());
            }
            Err(err) => {
                warn!(?target, error = %err, "status poll failed");
                entry.last_error = Some(err.to_string());
            }
        }
    }
}

/// Runs one round: every target is fetched concurrently and recorded on its
/// own, so one failure never clears or blocks another target.
pub async fn poll_once(source: &dyn StatusSource, state: &mut PollerState) {
    let results = join_all(
        PollTarget::ALL
            .iter()
            .map(|target| async move { (*target, source.fetch(*target).await) }),
    )
    .await;
    for (target, result) in results {
        state.record(target, result);
    }
    state.rounds += 1;
    debug!(round = state.rounds, "status poll round finished");
}

/// Periodic background fetch of service, resource and AI status.
pub struct StatusPoller;

impl StatusPoller {
    /// Spawns the polling task. The first round runs immediately.
    pub fn spawn(source: Arc<dyn StatusSource>, interval: Duration) -> PollerHandle {
        let (state_tx, state_rx) = watch::channel(PollerState::default());
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut state = PollerState::default();
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {}
                }
                poll_once(source.as_ref(), &mut state).await;
                state_tx.send_replace(state.clone());
            }
            debug!("status poller stopped");
        });

        PollerHandle {
            state: state_rx,
            stop: stop_tx,
            task,
        }
    }
}

pub struct PollerHandle {
    state: watch::Receiver<PollerState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Current state, published after every round.
    pub fn snapshot(&self) -> PollerState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    /// Stops the poller and waits for the task to end.
    pub async fn stop(self) {
        self.stop.send_replace(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails resources from the second call on.
    #[derive(Default)]
    struct FlakySource {
        resource_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StatusSource for FlakySource {
        async fn fetch(&self, target: PollTarget) -> Result<Snapshot, StreamError> {
            match target {
                PollTarget::Services => Ok(Snapshot::Services(vec![ServiceStatus {
                    name: "nextcloud".into(),
                    running: true,
                    ..ServiceStatus::default()
                }])),
                PollTarget::Resources => {
                    if self.resource_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(Snapshot::Resources(SystemResources {
                            cpu_cores: 8,
                            ..SystemResources::default()
                        }))
                    } else {
                        Err(StreamError::collaborator("/api/resources", "timed out"))
                    }
                }
                PollTarget::Ai => Err(StreamError::collaborator("/api/ai/status", "engine down")),
            }
        }
    }

    #[tokio::test]
    async fn failures_are_isolated_per_target() {
        let source = FlakySource::default();
        let mut state = PollerState::default();

        poll_once(&source, &mut state).await;
        poll_once(&source, &mut state).await;

        let services = state.entry(PollTarget::Services).expect("services");
        assert!(matches!(&services.snapshot, Some(Snapshot::Services(s)) if s[0].running));
        assert_eq!(services.last_error, None);

        let resources = state.entry(PollTarget::Resources).expect("resources");
        assert!(matches!(&resources.snapshot, Some(Snapshot::Resources(r)) if r.cpu_cores == 8));
        assert!(resources.last_error.as_deref().is_some_and(|e| e.contains("timed out")));

        let ai = state.entry(PollTarget::Ai).expect("ai");
        assert_eq!(ai.snapshot, None);
        assert_eq!(ai.updated_at, None);
        assert_eq!(state.rounds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_poller_publishes_rounds_until_stopped() {
        let handle = StatusPoller::spawn(Arc::new(FlakySource::default()), Duration::from_secs(5));
        let mut rx = handle.subscribe();

        rx.wait_for(|s| s.rounds >= 1).await.expect("first round");
        tokio::time::sleep(Duration::from_secs(11)).await;
        let rounds = handle.snapshot().rounds;
        assert_eq!(rounds, 3);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.borrow().rounds, 3);
    }
}
