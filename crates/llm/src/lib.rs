use std::sync::Arc;

pub mod events;
pub mod history;
mod model;
mod openai;
mod provider;
pub mod request;
pub mod sse;

pub use events::{
    FailureKind, StreamEventMapped, StreamEventPayload, StreamFailure, StreamSessionId,
    StreamTarget,
};
pub use history::{DEFAULT_KEEP_TURNS, select_history_window};
pub use model::{DEFAULT_OPENAI_MODEL, Model, default_openai_models, find_model};
pub use openai::{DEFAULT_ENDPOINT, OPENAI_PROVIDER_ID, OpenAiProvider};
pub use provider::{
    CredentialSource, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderResult, ProviderStreamHandle, ProviderWorker, StaticCredential, StreamRequest,
    make_event_stream,
};
pub use request::{ChatMessage, ChatRequest, ContentPart, ImageUrl, build_chat_request};

pub fn create_provider(
    mut config: ProviderConfig,
    credentials: Arc<dyn CredentialSource>,
) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        OPENAI_PROVIDER_ID => Ok(Arc::new(OpenAiProvider::new(config, credentials))),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
