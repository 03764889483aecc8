use portal_llm::{StreamFailure, StreamTarget};

/// Lifecycle of one streaming request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Connecting(StreamTarget),
    Streaming(StreamTarget),
    Completed(StreamTarget),
    Failed {
        target: StreamTarget,
        failure: StreamFailure,
    },
    Cancelled(StreamTarget),
}

/// State transition input for stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Connect(StreamTarget),
    Open(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        failure: StreamFailure,
    },
    Cancel(StreamTarget),
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyActive {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NotConnecting(StreamTarget),
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns the target while the stream is `Connecting` or `Streaming`.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Connecting(target) | Self::Streaming(target) => Some(*target),
            Self::Idle | Self::Completed(_) | Self::Failed { .. } | Self::Cancelled(_) => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_target().is_some()
    }

    /// Returns true when incoming stream data belongs to the active session.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Applies one transition deterministically.
    ///
    /// Terminal transitions must match the active session exactly, so at most one
    /// terminal state is ever reached per target.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Connect(target) => self.apply_connect(target),
            StreamTransition::Open(target) => self.apply_open(target),
            StreamTransition::Complete(target) => {
                self.apply_terminal(target, Self::Completed(target))
            }
            StreamTransition::Fail { target, failure } => {
                self.apply_terminal(target, Self::Failed { target, failure })
            }
            StreamTransition::Cancel(target) => self.apply_terminal(target, Self::Cancelled(target)),
        }
    }

    fn apply_connect(&self, target: StreamTarget) -> StreamTransitionResult {
        match self.active_target() {
            Some(active) => Err(StreamTransitionRejection::AlreadyActive {
                active,
                attempted: target,
            }),
            None => Ok(Self::Connecting(target)),
        }
    }

    fn apply_open(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Connecting(active) if *active == target => Ok(Self::Streaming(target)),
            Self::Streaming(active) if *active == target => {
                Err(StreamTransitionRejection::NotConnecting(target))
            }
            Self::Connecting(active) | Self::Streaming(active) => {
                Err(StreamTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle | Self::Completed(_) | Self::Failed { .. } | Self::Cancelled(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }

    fn apply_terminal(&self, target: StreamTarget, next: StreamState) -> StreamTransitionResult {
        match self.active_target() {
            Some(active) if active == target => Ok(next),
            Some(active) => Err(StreamTransitionRejection::SessionMismatch {
                active,
                attempted: target,
            }),
            None => Err(StreamTransitionRejection::NoActiveStream),
        }
    }
}

#[cfg(test)]
mod tests {
    use portal_llm::{FailureKind, StreamSessionId};
    use portal_storage::ThreadId;

    use super::*;

    fn target(session: u64) -> StreamTarget {
        StreamTarget::new(ThreadId::new_v7(), StreamSessionId::new(session))
    }

    #[test]
    fn happy_path_reaches_completed() {
        let target = target(1);
        let state = StreamState::Idle
            .apply(StreamTransition::Connect(target))
            .and_then(|state| state.apply(StreamTransition::Open(target)))
            .and_then(|state| state.apply(StreamTransition::Complete(target)))
            .unwrap();

        assert_eq!(state, StreamState::Completed(target));
        assert!(!state.is_active());
    }

    #[test]
    fn connecting_may_fail_directly() {
        let target = target(1);
        let failure = StreamFailure::new(FailureKind::HttpStatus(500), "HTTP 500");
        let state = StreamState::Connecting(target)
            .apply(StreamTransition::Fail {
                target,
                failure: failure.clone(),
            })
            .unwrap();

        assert_eq!(state, StreamState::Failed { target, failure });
    }

    #[test]
    fn second_terminal_is_rejected() {
        let target = target(1);
        let cancelled = StreamState::Streaming(target)
            .apply(StreamTransition::Cancel(target))
            .unwrap();

        assert_eq!(
            cancelled.apply(StreamTransition::Complete(target)),
            Err(StreamTransitionRejection::NoActiveStream)
        );
    }

    #[test]
    fn stale_session_is_rejected() {
        let active = target(2);
        let stale = StreamTarget::new(active.thread_id, StreamSessionId::new(1));

        assert!(!StreamState::Streaming(active).accepts_stream_event(stale));
        assert_eq!(
            StreamState::Streaming(active).apply(StreamTransition::Complete(stale)),
            Err(StreamTransitionRejection::SessionMismatch {
                active,
                attempted: stale,
            })
        );
    }

    #[test]
    fn open_is_only_accepted_once_for_the_connecting_session() {
        let active = target(1);
        let stale = StreamTarget::new(active.thread_id, StreamSessionId::new(7));

        let streaming = StreamState::Connecting(active)
            .apply(StreamTransition::Open(active))
            .unwrap();
        assert_eq!(streaming, StreamState::Streaming(active));
        assert_eq!(
            streaming.apply(StreamTransition::Open(active)),
            Err(StreamTransitionRejection::NotConnecting(active))
        );
        assert_eq!(
            StreamState::Connecting(active).apply(StreamTransition::Open(stale)),
            Err(StreamTransitionRejection::SessionMismatch {
                active,
                attempted: stale,
            })
        );
        assert_eq!(
            StreamState::Streaming(active).apply(StreamTransition::Open(stale)),
            Err(StreamTransitionRejection::SessionMismatch {
                active,
                attempted: stale,
            })
        );
        assert_eq!(
            StreamState::Idle.apply(StreamTransition::Open(active)),
            Err(StreamTransitionRejection::NoActiveStream)
        );
    }

    #[test]
    fn connect_while_active_is_rejected() {
        let active = target(1);
        let next = target(2);
        assert!(matches!(
            StreamState::Connecting(active).apply(StreamTransition::Connect(next)),
            Err(StreamTransitionRejection::AlreadyActive { .. })
        ));
        assert_eq!(
            StreamState::Cancelled(active).apply(StreamTransition::Connect(next)),
            Ok(StreamState::Connecting(next))
        );
    }
}
