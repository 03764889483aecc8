use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::ids::{MessageId, ThreadId};

/// Placeholder title kept until the first user text arrives.
pub const DEFAULT_THREAD_TITLE: &str = "New Chat";

/// Derived titles are cut to this many characters.
pub const TITLE_MAX_CHARS: usize = 60;

/// Conversation speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
///
/// `text` stays `None` for image-only user turns; an assistant message with no text
/// and no images is the placeholder that exists before the first streamed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    #[serde(default)]
    pub text: Option<String>,
    /// Encoded image payloads (data URLs) in display order.
    #[serde(default)]
    pub images: Vec<String>,
    pub timestamp_unix_seconds: u64,
}

impl Message {
    pub fn new(role: Role, text: Option<String>, images: Vec<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            role,
            text,
            images,
            timestamp_unix_seconds: current_unix_timestamp_seconds(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Some(text.into()), Vec::new())
    }

    /// Blank text is stored as `None`.
    pub fn user(text: impl Into<String>, images: Vec<String>) -> Self {
        let text = text.into();
        let text = if text.is_empty() { None } else { Some(text) };
        Self::new(Role::User, text, images)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(text.into()), Vec::new())
    }

    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn append_text(&mut self, fragment: &str) {
        self.text.get_or_insert_with(String::new).push_str(fragment);
    }
}

/// One persisted conversation; `messages` are in chronological order and never reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

impl Thread {
    pub fn new() -> Self {
        let now = current_unix_timestamp_seconds();
        Self {
            id: ThreadId::new_v7(),
            title: DEFAULT_THREAD_TITLE.to_string(),
            created_at_unix_seconds: now,
            updated_at_unix_seconds: now,
            messages: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at_unix_seconds = current_unix_timestamp_seconds();
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_message_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    pub fn has_placeholder_title(&self) -> bool {
        self.title == DEFAULT_THREAD_TITLE
    }

    /// Sets the title from user text, only while the placeholder is still in place.
    ///
    /// Returns true when the title changed.
    pub fn derive_title(&mut self, text: &str) -> bool {
        if !self.has_placeholder_title() || text.is_empty() {
            return false;
        }

        self.title = text.chars().take(TITLE_MAX_CHARS).collect();
        true
    }
}

pub fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
