use std::sync::Arc;

use tracing::info;

use crate::config::DashboardConfig;
use crate::conversation::ConversationContext;
use crate::errors::StreamError;
use crate::registry::{SessionRegistry, TargetKey};
use crate::session::{SessionReport, StreamSession};
use crate::target::{ChatTarget, StreamTarget};
use crate::transport::{
    ChatRequest, HttpTransport, PullRequest, ServerChatRequest, StreamRequest, StreamTransport,
};

struct CoordinatorInner {
    transport: Arc<dyn StreamTransport>,
    config: DashboardConfig,
    registry: SessionRegistry,
}

/// Entry point for chat and model-pull streams.
///
/// Enforces one active session per target according to the configured
/// `ActivePolicy`. Cheap to clone; clones share the session registry.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Empty conversation using the configured context window.
    pub fn conversation(&self) -> ConversationContext {
        ConversationContext::new(self.inner.config.context_window)
    }

    /// Claims `key` and returns an unstarted session.
    ///
    /// Use this when the abort handle is needed before the exchange starts;
    /// otherwise `send_chat` and `pull_model` do both steps.
    pub async fn open_session(&self, key: TargetKey) -> Result<StreamSession, StreamError> {
        let lease = self
            .inner
            .registry
            .acquire(key, self.inner.config.active_policy)
            .await?;
        Ok(StreamSession::new(lease, self.inner.config.flush_tick))
    }

    /// Sends `text` in conversation `conversation_id` with the default model
    /// and streams the reply into `target`.
    pub async fn send_chat<T>(
        &self,
        conversation_id: &str,
        target: &mut T,
        text: &str,
    ) -> Result<SessionReport, StreamError>
    where
        T: ChatTarget + ?Sized,
    {
        let model = self.inner.config.default_model.clone();
        self.send_chat_with_model(conversation_id, &model, target, text)
            .await
    }

    pub async fn send_chat_with_model<T>(
        &self,
        conversation_id: &str,
        model: &str,
        target: &mut T,
        text: &str,
    ) -> Result<SessionReport, StreamError>
    where
        T: ChatTarget + ?Sized,
    {
        // A blank message must not retire a running reply.
        if text.trim().is_empty() {
            return Err(StreamError::Validation(
                "message text must not be empty".into(),
            ));
        }
        let session = self
            .open_session(TargetKey::Chat(conversation_id.to_string()))
            .await?;
        self.run_chat(session, model, target, text).await
    }

    /// Composes the windowed payload and runs `session` as a chat exchange.
    ///
    /// Composition happens after the target has been claimed so a replaced
    /// session has already settled its reply.
    pub async fn run_chat<T>(
        &self,
        session: StreamSession,
        model: &str,
        target: &mut T,
        text: &str,
    ) -> Result<SessionReport, StreamError>
    where
        T: ChatTarget + ?Sized,
    {
        let messages = target.compose(text)?;
        info!(
            session_id = %session.id(),
            model,
            messages = messages.len(),
            "sending chat"
        );
        let request = StreamRequest::Chat(ChatRequest {
            model: model.to_string(),
            messages,
        });
        Ok(session
            .run(self.inner.transport.as_ref(), request, target)
            .await)
    }

    /// Asks about the server itself. The server prepends a system prompt built
    /// from live server state and answers `message` alone, so no history is
    /// sent; the message and reply are still recorded in `target`.
    pub async fn send_server_chat<T>(
        &self,
        conversation_id: &str,
        model: &str,
        target: &mut T,
        message: &str,
    ) -> Result<SessionReport, StreamError>
    where
        T: ChatTarget + ?Sized,
    {
        if message.trim().is_empty() {
            return Err(StreamError::Validation(
                "message text must not be empty".into(),
            ));
        }
        let session = self
            .open_session(TargetKey::Chat(conversation_id.to_string()))
            .await?;
        self.run_server_chat(session, model, target, message).await
    }

    pub async fn run_server_chat<T>(
        &self,
        session: StreamSession,
        model: &str,
        target: &mut T,
        message: &str,
    ) -> Result<SessionReport, StreamError>
    where
        T: ChatTarget + ?Sized,
    {
        // Records the user message; the windowed payload is not sent.
        target.compose(message)?;
        info!(session_id = %session.id(), model, "sending server chat");
        let request = StreamRequest::ServerChat(ServerChatRequest {
            message: message.to_string(),
            model: model.to_string(),
        });
        Ok(session
            .run(self.inner.transport.as_ref(), request, target)
            .await)
    }

    /// Pulls `model` and streams its status lines into `tracker`, usually a
    /// `ProgressTracker` or a wrapper around one.
    pub async fn pull_model<T>(
        &self,
        model: &str,
        tracker: &mut T,
    ) -> Result<SessionReport, StreamError>
    where
        T: StreamTarget + ?Sized,
    {
        if model.trim().is_empty() {
            return Err(StreamError::Validation("model name must not be empty".into()));
        }
        let session = self
            .open_session(TargetKey::Download(model.to_string()))
            .await?;
        Ok(self.run_pull(session, model, tracker).await)
    }

    pub async fn run_pull<T>(
        &self,
        session: StreamSession,
        model: &str,
        tracker: &mut T,
    ) -> SessionReport
    where
        T: StreamTarget + ?Sized,
    {
        info!(session_id = %session.id(), model, "pulling model");
        let request = StreamRequest::Pull(PullRequest {
            model: model.to_string(),
        });
        session
            .run(self.inner.transport.as_ref(), request, tracker)
            .await
    }

    /// Aborts the session streaming into `key`, if any.
    pub fn cancel(&self, key: &TargetKey) -> bool {
        self.inner.registry.cancel(key)
    }
}

/// Builder for `Coordinator`.
#[derive(Default)]
pub struct CoordinatorBuilder {
    config: Option<DashboardConfig>,
    transport: Option<Arc<dyn StreamTransport>>,
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: DashboardConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the configuration and builds the coordinator. Without an
    /// explicit transport an `HttpTransport` for `config.base_url` is used.
    pub fn build(self) -> Result<Coordinator, StreamError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let transport: Arc<dyn StreamTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?),
        };
        Ok(Coordinator {
            inner: Arc::new(CoordinatorInner {
                transport,
                config,
                registry: SessionRegistry::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Message, Role};
    use crate::errors::TransportError;
    use crate::progress::{ProgressTracker, PullVerdict};
    use crate::registry::ActivePolicy;
    use crate::session::SessionOutcome;
    use crate::test_support::{FakeTransport, RecordingTarget};
    use std::sync::Mutex;
    use std::time::Duration;

    fn coordinator(transport: Arc<FakeTransport>, policy: ActivePolicy) -> Coordinator {
        Coordinator::builder()
            .config(DashboardConfig::default().active_policy(policy))
            .transport(transport)
            .build()
            .expect("coordinator")
    }

    fn history(n: usize) -> ConversationContext {
        let mut context = ConversationContext::new(10);
        for i in 0..n {
            context.begin_assistant();
            context.append_assistant(&format!("m{i}"));
            context.settle_assistant();
        }
        context
    }

    #[tokio::test(start_paused = true)]
    async fn chat_request_carries_window_and_new_message() {
        let transport = Arc::new(FakeTransport::new().body(vec![b"ok".to_vec()]));
        let coordinator = coordinator(transport.clone(), ActivePolicy::Reject);
        let mut context = history(15);

        let report = coordinator
            .send_chat("c1", &mut context, "next")
            .await
            .expect("send");

        assert_eq!(report.outcome, SessionOutcome::Completed);
        let requests = transport.requests();
        let StreamRequest::Chat(request) = &requests[0] else {
            panic!("expected chat request");
        };
        assert_eq!(request.model, "qwen2.5:7b");
        assert_eq!(request.messages.len(), 11);
        assert_eq!(request.messages[0].content, "m5");
        assert_eq!(request.messages[10], Message::user("next"));
        assert_eq!(context.len(), 17);
        assert_eq!(context.messages()[16].role, Role::Assistant);
        assert_eq!(context.messages()[16].content, "ok");
        assert!(!coordinator.registry().is_active(&TargetKey::Chat("c1".into())));
    }

    #[tokio::test]
    async fn blank_text_is_rejected_without_touching_sessions() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = coordinator(transport.clone(), ActivePolicy::CancelPrevious);
        let mut target = RecordingTarget::default();

        let result = coordinator.send_chat("c1", &mut target, "  \n").await;
        assert!(matches!(result, Err(StreamError::Validation(_))));
        assert!(transport.requests().is_empty());
        assert!(!target.began);
    }

    #[tokio::test(start_paused = true)]
    async fn second_send_cancels_and_replaces_the_first() {
        let (transport, tx) = FakeTransport::new().channel();
        let transport = Arc::new(transport.body(vec![b"second reply".to_vec()]));
        let coordinator = coordinator(transport.clone(), ActivePolicy::CancelPrevious);
        let conversation = Arc::new(Mutex::new(ConversationContext::default()));

        let first = {
            let coordinator = coordinator.clone();
            let mut target = conversation.clone();
            tokio::spawn(async move { coordinator.send_chat("c1", &mut target, "first").await })
        };
        tx.send(Ok(bytes::Bytes::from_static(b"first rep"))).expect("send");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut target = conversation.clone();
        let second = coordinator
            .send_chat("c1", &mut target, "second")
            .await
            .expect("second");
        let first = first.await.expect("join").expect("first");

        assert_eq!(first.outcome, SessionOutcome::Cancelled);
        assert_eq!(second.outcome, SessionOutcome::Completed);
        let _ = tx.send(Ok(bytes::Bytes::from_static(b"ly")));

        let context = conversation.lock().expect("lock");
        let contents: Vec<&str> = context.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "first rep", "second", "second reply"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reject_policy_refuses_second_send() {
        let transport = Arc::new(FakeTransport::new().hang());
        let coordinator = coordinator(transport.clone(), ActivePolicy::Reject);

        let session = coordinator
            .open_session(TargetKey::Chat("c1".into()))
            .await
            .expect("first");
        let abort = session.abort_handle();
        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let mut target = RecordingTarget::default();
                coordinator
                    .run_chat(session, "m", &mut target, "first")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut target = RecordingTarget::default();
        let busy = coordinator.send_chat("c1", &mut target, "second").await;
        assert!(matches!(busy, Err(StreamError::TargetBusy { .. })));
        assert!(!target.began);

        abort.abort();
        let first = first.await.expect("join").expect("first");
        assert_eq!(first.outcome, SessionOutcome::Cancelled);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_and_download_targets_run_independently() {
        let transport = Arc::new(
            FakeTransport::new()
                .refuse(TransportError::connect("refused"))
                .body(vec![b"pulling manifest\n".to_vec(), b"DONE\n".to_vec()]),
        );
        let coordinator = coordinator(transport, ActivePolicy::Reject);

        let mut context = ConversationContext::default();
        let chat = coordinator
            .send_chat("c1", &mut context, "hi")
            .await
            .expect("chat");
        let mut tracker = ProgressTracker::new("qwen2.5:7b");
        let pull = coordinator
            .pull_model("qwen2.5:7b", &mut tracker)
            .await
            .expect("pull");

        assert!(matches!(chat.outcome, SessionOutcome::Failed(_)));
        assert!(context.messages()[1].is_failure_notice());
        assert_eq!(pull.outcome, SessionOutcome::Completed);
        assert_eq!(pull.target, TargetKey::Download("qwen2.5:7b".into()));
        assert_eq!(tracker.state().verdict(), PullVerdict::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn server_chat_sends_only_the_message_and_records_the_exchange() {
        let transport = Arc::new(FakeTransport::new().body(vec![b"Disk is 40% full.".to_vec()]));
        let coordinator = coordinator(transport.clone(), ActivePolicy::Reject);
        let mut context = history(4);

        let report = coordinator
            .send_server_chat("c1", "llama3.2:3b", &mut context, "disk?")
            .await
            .expect("server chat");

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(
            transport.requests(),
            vec![StreamRequest::ServerChat(ServerChatRequest {
                message: "disk?".into(),
                model: "llama3.2:3b".into(),
            })]
        );
        let tail: Vec<&str> = context.messages()[4..]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tail, vec!["disk?", "Disk is 40% full."]);

        let blank = coordinator
            .send_server_chat("c1", "llama3.2:3b", &mut context, " ")
            .await;
        assert!(matches!(blank, Err(StreamError::Validation(_))));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = Coordinator::builder()
            .config(DashboardConfig::default().context_window(0))
            .transport(Arc::new(FakeTransport::new()))
            .build();
        assert!(
            matches!(result, Err(StreamError::Config(message)) if message.contains("context_window"))
        );
    }
}
