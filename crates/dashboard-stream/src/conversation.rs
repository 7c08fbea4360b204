use crate::config::DEFAULT_CONTEXT_WINDOW;
use crate::errors::StreamError;

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Display-side status of a message; never sent upstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageStatus {
    #[default]
    Complete,
    /// Assistant reply currently being filled by a stream.
    Streaming,
    /// Failure notice written in place of (or after) a reply.
    Failed,
}

/// One chat message. Serializes as `{ "role", "content" }`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip)]
    pub status: MessageStatus,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            status: MessageStatus::Complete,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_failure_notice(&self) -> bool {
        self.status == MessageStatus::Failed
    }

    fn eligible_for_window(&self) -> bool {
        self.role != Role::System
            && self.status != MessageStatus::Failed
            && !self.content.trim().is_empty()
    }
}

/// Ordered chat history with a bounded upstream context window.
///
/// The full history is kept for display. Only the most recent
/// `window` non-empty, non-failed messages are sent with a request, as a
/// contiguous suffix in original order.
#[derive(Clone, Debug)]
pub struct ConversationContext {
    messages: Vec<Message>,
    window: usize,
    system_prompt: Option<String>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl ConversationContext {
    pub fn new(window: usize) -> Self {
        Self {
            messages: Vec::new(),
            window: window.max(1),
            system_prompt: None,
        }
    }

    /// Starts the history with an assistant greeting.
    pub fn with_greeting(window: usize, greeting: impl Into<String>) -> Self {
        let mut context = Self::new(window);
        context.messages.push(Message::assistant(greeting));
        context
    }

    /// Sets a system prompt prepended to every request payload. It does not
    /// count against the window and is not part of display history.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window
    }

    /// The messages that would be sent upstream right now.
    pub fn window(&self) -> Vec<Message> {
        let eligible: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.eligible_for_window())
            .collect();
        let start = eligible.len().saturating_sub(self.window);
        eligible[start..]
            .iter()
            .map(|m| Message::new(m.role, m.content.clone()))
            .collect()
    }

    /// Records a new user message and returns the exact request payload:
    /// the window over prior history followed by the new message.
    pub fn compose(&mut self, text: &str) -> Result<Vec<Message>, StreamError> {
        if text.trim().is_empty() {
            return Err(StreamError::Validation(
                "message text must not be empty".into(),
            ));
        }
        if self.streaming_index().is_some() {
            return Err(StreamError::Validation(
                "an assistant reply is still streaming".into(),
            ));
        }

        let mut payload = Vec::with_capacity(self.window + 2);
        if let Some(prompt) = &self.system_prompt {
            payload.push(Message::new(Role::System, prompt.clone()));
        }
        payload.extend(self.window());

        let message = Message::user(text);
        payload.push(message.clone());
        self.messages.push(message);
        Ok(payload)
    }

    /// Opens the assistant slot that a stream fills.
    pub fn begin_assistant(&mut self) {
        if self.streaming_index().is_some() {
            return;
        }
        self.messages.push(Message {
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Streaming,
        });
    }

    /// Appends streamed text to the open assistant slot.
    pub fn append_assistant(&mut self, text: &str) {
        if let Some(idx) = self.streaming_index() {
            self.messages[idx].content.push_str(text);
        }
    }

    /// Marks the open assistant slot as finished, keeping its content. A slot
    /// that never received text is removed.
    pub fn settle_assistant(&mut self) {
        if let Some(idx) = self.streaming_index() {
            if self.messages[idx].content.is_empty() {
                self.messages.remove(idx);
            } else {
                self.messages[idx].status = MessageStatus::Complete;
            }
        }
    }

    /// Writes a failure notice. An empty slot is replaced by the notice;
    /// a slot that already holds streamed text keeps it and the notice follows
    /// as its own message.
    pub fn fail_assistant(&mut self, notice: &str) {
        match self.streaming_index() {
            Some(idx) if self.messages[idx].content.is_empty() => {
                let slot = &mut self.messages[idx];
                slot.content = notice.to_string();
                slot.status = MessageStatus::Failed;
            }
            Some(idx) => {
                self.messages[idx].status = MessageStatus::Complete;
                self.push_notice(notice);
            }
            None => self.push_notice(notice),
        }
    }

    /// The reply currently being streamed, if any.
    pub fn streaming_reply(&self) -> Option<&str> {
        self.streaming_index()
            .map(|idx| self.messages[idx].content.as_str())
    }

    fn push_notice(&mut self, notice: &str) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: notice.to_string(),
            status: MessageStatus::Failed,
        });
    }

    fn streaming_index(&self) -> Option<usize> {
        let idx = self.messages.len().checked_sub(1)?;
        (self.messages[idx].status == MessageStatus::Streaming).then_some(idx)
    }
}
