use std::sync::Arc;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use snafu::{OptionExt, ResultExt};
use tokio::sync::{mpsc, oneshot};

use super::events::{StreamEventMapped, StreamEventPayload, StreamFailure, StreamTarget};
use super::model::{Model, default_openai_models};
use super::provider::{
    CredentialSource, HttpStatusSnafu, InvalidRequestSnafu, LlmProvider, MissingCredentialSnafu,
    ProviderConfig, ProviderError, ProviderResult, ProviderStreamHandle, ProviderWorker,
    StreamRequest, TransportSnafu, make_event_stream,
};
use super::sse::{Frame, LineBuffer, parse_frame};

pub const OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// What the worker should do after one frame.
enum FrameStep {
    Continue,
    Finished,
    ReceiverGone,
}

/// Chat-completions client that streams replies over server-sent events.
pub struct OpenAiProvider {
    config: ProviderConfig,
    credentials: Arc<dyn CredentialSource>,
    client: reqwest::Client,
    models: Vec<Model>,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            config,
            credentials,
            client: reqwest::Client::new(),
            models: default_openai_models(),
        }
    }

    pub fn completions_url(&self) -> String {
        let endpoint = if self.config.endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            self.config.endpoint.as_str()
        };
        format!("{}/chat/completions", endpoint.trim_end_matches('/'))
    }

    /// Validates the credential and encodes the body; nothing touches the network here.
    fn prepare_request(&self, request: &StreamRequest) -> ProviderResult<reqwest::RequestBuilder> {
        let api_key = self
            .credentials
            .api_key()
            .filter(|key| !key.trim().is_empty())
            .context(MissingCredentialSnafu {
                stage: "prepare-request-credential",
                provider_id: self.config.provider_id.clone(),
            })?;

        let body = serde_json::to_vec(&request.body).context(InvalidRequestSnafu {
            stage: "prepare-request-encode-body",
        })?;

        Ok(self
            .client
            .post(self.completions_url())
            .header(AUTHORIZATION, format!("Bearer {}", api_key.trim()))
            .header(CONTENT_TYPE, "application/json")
            .body(body))
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        error: &ProviderError,
    ) {
        let _ = event_tx.send(StreamEventMapped::new(
            target,
            StreamEventPayload::Error(StreamFailure::from(error)),
        ));
    }

    fn dispatch_line(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        line: &str,
    ) -> FrameStep {
        match parse_frame(line) {
            Frame::Ignored | Frame::Empty => FrameStep::Continue,
            Frame::Malformed => {
                tracing::debug!(stream_target = ?target, line, "skipping malformed stream frame");
                FrameStep::Continue
            }
            Frame::Done => FrameStep::Finished,
            Frame::Delta(text) => {
                let event = StreamEventMapped::new(target, StreamEventPayload::Delta(text));
                if event_tx.send(event).is_err() {
                    FrameStep::ReceiverGone
                } else {
                    FrameStep::Continue
                }
            }
        }
    }

    async fn run_stream_worker(
        request: reqwest::RequestBuilder,
        target: StreamTarget,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let sent = tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                tracing::debug!(stream_target = ?target, "stream cancelled while connecting");
                return;
            }
            sent = request.send() => sent,
        };

        let response = match sent.context(TransportSnafu {
            stage: "send-request",
        }) {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(stream_target = ?target, error = %error, "failed to open provider stream");
                Self::emit_error_event(&event_tx, target, &error);
                return;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            let body = tokio::select! {
                biased;
                _ = &mut cancel_rx => return,
                body = response.text() => body.unwrap_or_default(),
            };
            let error = HttpStatusSnafu {
                stage: "response-status",
                status: status.as_u16(),
                body,
            }
            .build();
            tracing::warn!(stream_target = ?target, status = status.as_u16(), "provider rejected stream request");
            Self::emit_error_event(&event_tx, target, &error);
            return;
        }

        if event_tx
            .send(StreamEventMapped::new(target, StreamEventPayload::Opened))
            .is_err()
        {
            return;
        }

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    // Dropping the body stream closes the connection.
                    tracing::debug!(stream_target = ?target, "provider stream cancelled");
                    return;
                }
                next_chunk = body.next() => {
                    match next_chunk {
                        Some(Ok(chunk)) => {
                            for line in lines.push(&chunk) {
                                match Self::dispatch_line(&event_tx, target, &line) {
                                    FrameStep::Continue => {}
                                    FrameStep::Finished => {
                                        let _ = event_tx.send(StreamEventMapped::new(
                                            target,
                                            StreamEventPayload::Done,
                                        ));
                                        return;
                                    }
                                    FrameStep::ReceiverGone => return,
                                }
                            }
                        }
                        Some(Err(source)) => {
                            let error = ProviderError::Transport {
                                stage: "read-stream-chunk",
                                source,
                            };
                            tracing::warn!(stream_target = ?target, error = %error, "provider stream failed mid-body");
                            Self::emit_error_event(&event_tx, target, &error);
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        if let Some(line) = lines.finish()
            && let FrameStep::ReceiverGone = Self::dispatch_line(&event_tx, target, &line)
        {
            return;
        }

        let _ = event_tx.send(StreamEventMapped::new(target, StreamEventPayload::Done));
    }
}

impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn models(&self) -> &[Model] {
        &self.models
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let http_request = self.prepare_request(&request)?;

        tracing::debug!(
            stream_target = ?request.target,
            model_id = %request.body.model,
            message_count = request.body.messages.len(),
            "opening provider stream"
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            http_request,
            request.target,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}
