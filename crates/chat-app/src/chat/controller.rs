use std::collections::HashMap;
use std::sync::Arc;

use portal_llm::{
    FailureKind, LlmProvider, ProviderEventStream, ProviderStreamHandle, StreamEventMapped,
    StreamEventPayload, StreamFailure, StreamRequest, StreamSessionId, StreamTarget,
    build_chat_request, select_history_window,
};
use portal_storage::{Message, StoreError, StoreResult, ThreadId, ThreadStore};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::assembler;
use super::stream::{StreamState, StreamTransition};

pub const STREAM_CLOSED_EARLY_MESSAGE: &str = "stream ended before a terminal event";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ControllerError {
    #[snafu(display("nothing to send: prompt text and images are both empty"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("thread '{thread_id}' does not exist"))]
    UnknownThread {
        stage: &'static str,
        thread_id: ThreadId,
    },
    #[snafu(display("thread store failed on `{stage}`: {source}"))]
    Store {
        stage: &'static str,
        source: StoreError,
    },
}

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Everything that reaches the foreground task from stream readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Stream(StreamEventMapped),
    /// A reader drained its channel; the worker is gone.
    ReaderClosed(StreamTarget),
}

/// What changed after an event was applied, for whoever renders the thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    Opened {
        thread_id: ThreadId,
    },
    Delta {
        thread_id: ThreadId,
        fragment: String,
    },
    Completed {
        thread_id: ThreadId,
    },
    Failed {
        thread_id: ThreadId,
        failure: StreamFailure,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Streaming(StreamTarget),
    /// The request never left the process; the failure is already recorded in the thread.
    Failed(StreamFailure),
}

struct ActiveStream {
    state: StreamState,
    worker_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

/// Single writer of the thread store.
///
/// Stream workers run in the background and only send events; the owner of the controller
/// feeds them back through `handle_event` on one task, so store mutations are applied in
/// the order they were emitted.
pub struct ChatController {
    store: ThreadStore,
    provider: Arc<dyn LlmProvider>,
    model_id: String,
    keep_turns: usize,
    next_stream_session_id: u64,
    streams: HashMap<ThreadId, ActiveStream>,
    /// Terminal state of the most recent stream per thread, kept until the next send.
    finished: HashMap<ThreadId, StreamState>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ChatController {
    pub fn new(
        store: ThreadStore,
        provider: Arc<dyn LlmProvider>,
        model_id: impl Into<String>,
        keep_turns: usize,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            store,
            provider,
            model_id: model_id.into(),
            keep_turns,
            next_stream_session_id: 1,
            streams: HashMap::new(),
            finished: HashMap::new(),
            events_tx,
        };
        (controller, events_rx)
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Applies to the next send. Blank ids are rejected.
    pub fn set_model_id(&mut self, model_id: &str) -> bool {
        let model_id = model_id.trim();
        if model_id.is_empty() {
            return false;
        }

        self.model_id = model_id.to_string();
        true
    }

    pub fn is_streaming(&self, thread_id: ThreadId) -> bool {
        self.streams
            .get(&thread_id)
            .is_some_and(|active| active.state.is_active())
    }

    /// Active state if a stream is running, otherwise how the last one ended.
    pub fn stream_state(&self, thread_id: ThreadId) -> StreamState {
        self.streams
            .get(&thread_id)
            .map(|active| &active.state)
            .or_else(|| self.finished.get(&thread_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn create_thread(&mut self) -> ControllerResult<ThreadId> {
        self.store.create_thread().context(StoreSnafu {
            stage: "create-thread",
        })
    }

    pub fn select_thread(&mut self, thread_id: ThreadId) -> bool {
        self.store.select(thread_id)
    }

    pub fn delete_thread(&mut self, thread_id: ThreadId) -> ControllerResult<bool> {
        self.cancel(thread_id);
        self.finished.remove(&thread_id);
        self.store.delete_thread(thread_id).context(StoreSnafu {
            stage: "delete-thread",
        })
    }

    /// Appends a user turn and starts streaming the reply.
    ///
    /// Any stream already running for the thread is cancelled first.
    pub fn send(
        &mut self,
        thread_id: ThreadId,
        text: &str,
        images: Vec<String>,
    ) -> ControllerResult<SendOutcome> {
        let text = text.trim();
        ensure!(
            !text.is_empty() || !images.is_empty(),
            EmptyPromptSnafu {
                stage: "send-validate-prompt",
            }
        );
        ensure!(
            self.store.thread(thread_id).is_some(),
            UnknownThreadSnafu {
                stage: "send-resolve-thread",
                thread_id,
            }
        );

        self.cancel(thread_id);

        let appended = self.store.update_thread(thread_id, |thread| {
            thread.derive_title(text);
            thread.push_message(Message::user(text, images));
        });
        Self::log_persist_failure(thread_id, "send-append-user-message", appended);

        let thread = self.store.thread(thread_id).context(UnknownThreadSnafu {
            stage: "send-build-request",
            thread_id,
        })?;
        let body = build_chat_request(
            select_history_window(&thread.messages, self.keep_turns),
            self.model_id.clone(),
        );

        let target = self.alloc_target(thread_id);
        self.finished.remove(&thread_id);
        let connecting = StreamState::Connecting(target);

        match self.provider.stream_chat(StreamRequest::new(target, body)) {
            Ok(handle) => {
                tracing::info!(
                    thread_id = %thread_id,
                    session_id = target.session_id.0,
                    model_id = %self.model_id,
                    "stream started"
                );
                self.spawn_stream_pipeline(connecting, handle);
                Ok(SendOutcome::Streaming(target))
            }
            Err(error) => {
                let failure = StreamFailure::from(&error);
                tracing::warn!(thread_id = %thread_id, error = %error, "stream rejected before connecting");
                self.record_terminal(
                    &connecting,
                    StreamTransition::Fail {
                        target,
                        failure: failure.clone(),
                    },
                );
                let recorded = assembler::apply_terminal(&mut self.store, thread_id, Some(&failure));
                Self::log_persist_failure(thread_id, "send-record-failure", recorded);
                Ok(SendOutcome::Failed(failure))
            }
        }
    }

    /// Stops the thread's stream; nothing it emits afterwards reaches the store.
    pub fn cancel(&mut self, thread_id: ThreadId) -> bool {
        let Some(active) = self.streams.remove(&thread_id) else {
            return false;
        };

        // Aborting the reader drops its ProviderEventStream, which signals the worker.
        active.reader_task.abort();
        active.worker_task.abort();

        if let Some(target) = active.state.active_target() {
            self.record_terminal(&active.state, StreamTransition::Cancel(target));
            tracing::info!(thread_id = %thread_id, "stream cancelled");
        }
        true
    }

    pub fn cancel_all(&mut self) {
        let thread_ids = self.streams.keys().copied().collect::<Vec<_>>();
        for thread_id in thread_ids {
            self.cancel(thread_id);
        }
    }

    pub fn handle_event(&mut self, event: ControllerEvent) -> Option<ChatUpdate> {
        match event {
            ControllerEvent::Stream(event) => self.handle_stream_event(event),
            ControllerEvent::ReaderClosed(target) => self.handle_reader_closed(target),
        }
    }

    fn handle_stream_event(&mut self, event: StreamEventMapped) -> Option<ChatUpdate> {
        let target = event.target;
        let thread_id = target.thread_id;

        let Some(active) = self.streams.get_mut(&thread_id) else {
            tracing::trace!(stream_target = ?target, "dropping event for inactive thread");
            return None;
        };

        if !active.state.accepts_stream_event(target) {
            // Strict target equality keeps cancelled sessions out of the store.
            tracing::trace!(stream_target = ?target, "dropping stale stream event");
            return None;
        }

        match event.payload {
            StreamEventPayload::Opened => {
                match active.state.apply(StreamTransition::Open(target)) {
                    Ok(next_state) => active.state = next_state,
                    Err(rejection) => {
                        tracing::warn!(stream_target = ?target, ?rejection, "open transition rejected")
                    }
                }
                Some(ChatUpdate::Opened { thread_id })
            }
            StreamEventPayload::Delta(fragment) => {
                let applied = assembler::apply_delta(&mut self.store, thread_id, &fragment);
                Self::log_persist_failure(thread_id, "apply-delta", applied);
                Some(ChatUpdate::Delta {
                    thread_id,
                    fragment,
                })
            }
            StreamEventPayload::Done => self.finish_stream(target, None),
            StreamEventPayload::Error(failure) => self.finish_stream(target, Some(failure)),
        }
    }

    fn handle_reader_closed(&mut self, target: StreamTarget) -> Option<ChatUpdate> {
        let still_active = self
            .streams
            .get(&target.thread_id)
            .is_some_and(|active| active.state.accepts_stream_event(target));
        if !still_active {
            return None;
        }

        tracing::warn!(stream_target = ?target, "stream reader closed without a terminal event");
        self.finish_stream(
            target,
            Some(StreamFailure::new(
                FailureKind::Transport,
                STREAM_CLOSED_EARLY_MESSAGE,
            )),
        )
    }

    fn finish_stream(
        &mut self,
        target: StreamTarget,
        failure: Option<StreamFailure>,
    ) -> Option<ChatUpdate> {
        let thread_id = target.thread_id;
        let active = self.streams.remove(&thread_id)?;

        let transition = match &failure {
            None => StreamTransition::Complete(target),
            Some(failure) => StreamTransition::Fail {
                target,
                failure: failure.clone(),
            },
        };
        self.record_terminal(&active.state, transition);

        let recorded = assembler::apply_terminal(&mut self.store, thread_id, failure.as_ref());
        Self::log_persist_failure(thread_id, "apply-terminal", recorded);

        match failure {
            None => {
                tracing::info!(thread_id = %thread_id, "stream completed");
                Some(ChatUpdate::Completed { thread_id })
            }
            Some(failure) => {
                tracing::warn!(thread_id = %thread_id, kind = ?failure.kind, error = %failure, "stream failed");
                Some(ChatUpdate::Failed { thread_id, failure })
            }
        }
    }

    /// Applies a terminal transition and remembers the resulting state for the thread.
    fn record_terminal(&mut self, state: &StreamState, transition: StreamTransition) {
        let thread_id = match &transition {
            StreamTransition::Connect(target)
            | StreamTransition::Open(target)
            | StreamTransition::Complete(target)
            | StreamTransition::Cancel(target)
            | StreamTransition::Fail { target, .. } => target.thread_id,
        };

        match state.apply(transition) {
            Ok(next_state) => {
                self.finished.insert(thread_id, next_state);
            }
            Err(rejection) => {
                tracing::warn!(thread_id = %thread_id, ?rejection, "terminal transition rejected")
            }
        }
    }

    fn spawn_stream_pipeline(&mut self, state: StreamState, handle: ProviderStreamHandle) {
        let ProviderStreamHandle { stream, worker } = handle;
        let thread_id = stream.target().thread_id;

        let worker_task = tokio::spawn(worker);
        let reader_task = Self::spawn_stream_reader(stream, self.events_tx.clone());

        self.streams.insert(
            thread_id,
            ActiveStream {
                state,
                worker_task,
                reader_task,
            },
        );
    }

    fn spawn_stream_reader(
        mut stream: ProviderEventStream,
        events_tx: mpsc::UnboundedSender<ControllerEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let target = stream.target();
            while let Some(event) = stream.recv().await {
                let terminal = event.is_terminal();
                if events_tx.send(ControllerEvent::Stream(event)).is_err() || terminal {
                    return;
                }
            }
            let _ = events_tx.send(ControllerEvent::ReaderClosed(target));
        })
    }

    fn alloc_target(&mut self, thread_id: ThreadId) -> StreamTarget {
        let session_id = StreamSessionId::new(self.next_stream_session_id);
        // Reserve the next session id immediately so follow-up sends never reuse a target.
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);
        StreamTarget::new(thread_id, session_id)
    }

    /// The in-memory store stays authoritative; the next successful save rewrites the file.
    fn log_persist_failure<T>(thread_id: ThreadId, stage: &'static str, result: StoreResult<T>) {
        if let Err(error) = result {
            tracing::warn!(thread_id = %thread_id, stage, error = %error, "failed to persist thread store");
        }
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
