use portal_storage::ThreadId;

use super::provider::ProviderError;

/// Identifier for one streaming request.
///
/// This must change on every send so stale chunks can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stream routing key used for stale-chunk rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub thread_id: ThreadId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(thread_id: ThreadId, session_id: StreamSessionId) -> Self {
        Self {
            thread_id,
            session_id,
        }
    }
}

/// Classified terminal failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MissingCredential,
    InvalidRequest,
    HttpStatus(u16),
    Transport,
}

/// Cloneable terminal failure carried inside stream events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StreamFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ProviderError> for StreamFailure {
    fn from(error: &ProviderError) -> Self {
        let kind = match error {
            ProviderError::MissingCredential { .. } => FailureKind::MissingCredential,
            ProviderError::HttpStatus { status, .. } => FailureKind::HttpStatus(*status),
            ProviderError::Transport { .. } => FailureKind::Transport,
            ProviderError::InvalidRequest { .. } | ProviderError::UnsupportedProvider { .. } => {
                FailureKind::InvalidRequest
            }
        };

        Self::new(kind, error.to_string())
    }
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    /// The provider accepted the request and the body is being read.
    Opened,
    Delta(String),
    Done,
    Error(StreamFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn new(target: StreamTarget, payload: StreamEventPayload) -> Self {
        Self { target, payload }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            StreamEventPayload::Done | StreamEventPayload::Error(_)
        )
    }
}
