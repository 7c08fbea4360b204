//! Common imports for chat and pull callers.
pub use crate::{
    AbortHandle, ActivePolicy, ChatTarget, ConversationContext, Coordinator, DashboardConfig,
    FlushTick, Message, ProgressTracker, PullVerdict, Role, SessionOutcome, SessionReport,
    SessionState, StreamError, StreamTarget, TargetKey,
};
