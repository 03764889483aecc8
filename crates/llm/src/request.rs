use portal_storage::{Message, Role};
use serde::{Deserialize, Serialize};

/// Body of a streaming chat-completions call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    /// Text part first (when non-empty), then one image part per payload in order.
    pub fn from_message(message: &Message) -> Self {
        let mut content = Vec::with_capacity(message.images.len() + 1);

        if let Some(text) = message.text.as_deref()
            && !text.is_empty()
        {
            content.push(ContentPart::Text {
                text: text.to_string(),
            });
        }

        content.extend(message.images.iter().map(|url| ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.clone() },
        }));

        Self {
            role: message.role,
            content,
        }
    }
}

/// Builds a streaming request from an already windowed message list.
pub fn build_chat_request<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    model_id: impl Into<String>,
) -> ChatRequest {
    ChatRequest {
        model: model_id.into(),
        stream: true,
        messages: messages.into_iter().map(ChatMessage::from_message).collect(),
    }
}
