//! Streaming response coordinator for the personal-server dashboard.
//!
//! Long-running chat replies and model downloads arrive as incrementally
//! delivered HTTP bodies. A [`StreamSession`] decodes them, coalesces the text
//! to at most one update per flush tick, and writes it into a target (a
//! [`ConversationContext`] or a [`ProgressTracker`]) until the stream
//! completes, is cancelled, or fails.
//!
//! ```no_run
//! use dashboard_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let coordinator = Coordinator::builder()
//!     .config(DashboardConfig::from_env()?)
//!     .build()?;
//!
//! let mut conversation = ConversationContext::default();
//! let report = coordinator
//!     .send_chat("main", &mut conversation, "What is using my disk?")
//!     .await?;
//! println!("{:?}: {:?}", report.outcome, conversation.messages().last());
//! # Ok(())
//! # }
//! ```

/// Chunk buffering and flush scheduling.
pub mod coalescer;
/// JSON client for the non-streaming dashboard endpoints.
pub mod collaborator;
/// Client configuration and environment loading.
pub mod config;
/// Message history and context windowing.
pub mod conversation;
/// Coordinator entry point and builder.
pub mod coordinator;
/// Incremental UTF-8 decoding of response bodies.
pub mod decoder;
/// Error types for transports, sessions and collaborators.
pub mod errors;
/// Process-wide tracing setup.
pub mod observability;
/// Periodic status fetches with per-target failure isolation.
pub mod poller;
/// Common imports for typical usage.
pub mod prelude;
/// Line-oriented progress tracking for model pulls.
pub mod progress;
/// Single-active-session bookkeeping per target.
pub mod registry;
/// Stream session state machine and cancellation handle.
pub mod session;
/// Destinations of streamed content.
pub mod target;
/// Streaming transport contract and HTTP implementation.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use coalescer::{ChunkBuffer, ChunkCoalescer, FlushSchedule, FlushTick};
pub use collaborator::{
    ActionReply, AiModel, AiStatus, AppInfo, CatalogEntry, CollaboratorClient, ServiceStatus,
    SystemResources,
};
pub use config::{DEFAULT_CONTEXT_WINDOW, DashboardConfig};
pub use conversation::{ConversationContext, Message, MessageStatus, Role};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use decoder::{Utf8ChunkDecoder, decode_stream};
pub use errors::{StreamError, TransportError, failure_notice};
pub use observability::init_observability;
pub use poller::{
    PollEntry, PollTarget, PollerHandle, PollerState, Snapshot, StatusPoller, StatusSource,
    poll_once,
};
pub use progress::{ProgressState, ProgressTracker, PullVerdict};
pub use registry::{ActivePolicy, SessionLease, SessionRegistry, TargetKey};
pub use session::{AbortHandle, SessionOutcome, SessionReport, SessionState, StreamSession};
pub use target::{ChatTarget, StreamTarget};
pub use transport::{
    ByteStream, ChatRequest, HttpTransport, PullRequest, ServerChatRequest, StreamRequest,
    StreamTransport,
};
