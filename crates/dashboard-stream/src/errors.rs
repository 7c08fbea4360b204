/// Failures of the streaming transport itself (connection, status, body read,
/// or text decoding).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or no response head was received.
    #[error("connection failed: {message}")]
    Connect { message: String },
    /// The server answered with a non-success status.
    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed mid-stream.
    #[error("stream read failed: {message}")]
    Read { message: String },
    /// The response body was not valid UTF-8 text.
    #[error("stream decode failed: {message}")]
    Decode { message: String },
}

impl TransportError {
    /// Creates a connection-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a mid-body read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code when the failure came from a response status.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Top-level error type for the coordinator API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The caller aborted the exchange.
    #[error("stream cancelled")]
    Cancelled,
    /// Network, status, or decode failure.
    #[error(transparent)]
    Transport(TransportError),
    /// A non-streaming endpoint returned an explicit error payload.
    #[error("{endpoint} failed: {message}")]
    Collaborator { endpoint: String, message: String },
    /// Another session is already driving this target.
    #[error("a session is already active for {target}")]
    TargetBusy { target: String },
    /// Invalid coordinator or client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
}

impl StreamError {
    /// True when this error is the result of a caller-initiated abort.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn collaborator(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Text shown to the user in place of the streamed content, if any.
    ///
    /// Cancellations keep the partial content as final and produce no notice.
    pub fn user_notice(&self) -> Option<String> {
        match self {
            Self::Cancelled => None,
            Self::Transport(err) => Some(failure_notice(err)),
            other => Some(format!("Error: {other}")),
        }
    }
}

impl From<TransportError> for StreamError {
    fn from(value: TransportError) -> Self {
        StreamError::Transport(value)
    }
}

/// Renders the visible failure notice written into a target.
pub fn failure_notice(err: &TransportError) -> String {
    format!("Error: {err}")
}

pub(crate) fn transport_from_reqwest(err: &reqwest::Error, mid_body: bool) -> TransportError {
    if mid_body || err.is_body() || err.is_decode() {
        TransportError::read(err.to_string())
    } else {
        TransportError::connect(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_classified_by_variant() {
        assert!(StreamError::Cancelled.is_cancellation());
        let read = StreamError::from(TransportError::read("stream cancelled"));
        assert!(!read.is_cancellation());
    }

    #[test]
    fn cancellation_has_no_user_notice() {
        assert_eq!(StreamError::Cancelled.user_notice(), None);
        let notice = StreamError::from(TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        })
        .user_notice()
        .expect("transport notice");
        assert!(notice.starts_with("Error:"));
        assert!(notice.contains("502"));
    }
}
