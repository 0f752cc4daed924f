//! Conversation records as persisted by the conversation store.
//!
//! Field names serialize in camelCase so the stored JSON keeps the layout the
//! sidebar has always written (`createdAt`, `modelType`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_api::{ChatMessage, Role};

/// Title given to a conversation until its first message arrives
pub const DEFAULT_TITLE: &str = "New conversation";

const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    System,
}

impl Sender {
    pub fn role(&self) -> Role {
        match self {
            Sender::User => Role::User,
            Sender::Assistant => Role::Assistant,
            Sender::System => Role::System,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Pdf,
}

/// Attachment metadata kept on a message. The encoded payload itself is not
/// part of the model; `url` may hold an opaque reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AttachmentMeta {
    pub fn new(name: impl Into<String>, kind: AttachmentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size: None,
            url: None,
        }
    }

    /// True when `url` embeds the payload as a `data:` URL
    pub fn is_inline(&self) -> bool {
        self.url
            .as_deref()
            .map(|u| u.starts_with("data:"))
            .unwrap_or(false)
    }

    pub fn strip_inline(&mut self) {
        if self.is_inline() {
            self.url = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub text: String,
    pub sender: Sender,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_texts: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender,
            attachments: Vec::new(),
            selected_texts: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text)
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentMeta>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_selected_texts(mut self, texts: Vec<String>) -> Self {
        self.selected_texts = texts;
        self
    }

    /// Text-only replay of this message for the request history.
    ///
    /// Attachment payloads are not kept, so earlier images are not resent.
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        let mut parts: Vec<String> = self
            .selected_texts
            .iter()
            .map(|t| quote_selection(t))
            .collect();
        if !self.text.trim().is_empty() {
            parts.push(self.text.clone());
        }
        if parts.is_empty() {
            return None;
        }
        Some(ChatMessage::text(self.sender.role(), parts.join("\n\n")))
    }
}

/// Formats a snippet of selected page text for inclusion in a prompt
pub fn quote_selection(text: &str) -> String {
    let quoted = text
        .lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Selected text:\n{}", quoted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Text,
    Multimodal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub model_type: ModelType,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            model_type: ModelType::Text,
        }
    }

    /// Appends a message. Returns the new title when this first message
    /// named the conversation.
    pub fn push(&mut self, msg: Message, title_max_chars: usize) -> Option<String> {
        let first = self.messages.is_empty();
        let title = if first && self.title == DEFAULT_TITLE {
            derive_title(&msg.text, title_max_chars)
        } else {
            None
        };
        if let Some(title) = &title {
            self.title = title.clone();
        }
        self.messages.push(msg);
        self.updated_at = Utc::now();
        title
    }

    pub fn remove_message(&mut self, index: usize) -> Option<Message> {
        if index >= self.messages.len() {
            return None;
        }
        let removed = self.messages.remove(index);
        self.updated_at = Utc::now();
        Some(removed)
    }

    /// Flips the conversation to multimodal. Returns false if it already was.
    pub fn mark_multimodal(&mut self) -> bool {
        if self.model_type == ModelType::Multimodal {
            return false;
        }
        self.model_type = ModelType::Multimodal;
        true
    }

    pub fn is_multimodal(&self) -> bool {
        self.model_type == ModelType::Multimodal
    }

    /// The last `max_messages` messages as request history
    pub fn history(&self, max_messages: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(max_messages);
        self.messages[start..]
            .iter()
            .filter_map(Message::to_chat_message)
            .collect()
    }
}

/// Title from the first message: the text verbatim when it fits, otherwise
/// the first `max_chars` characters and an ellipsis.
pub fn derive_title(text: &str, max_chars: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().count() > max_chars {
        let mut title: String = text.chars().take(max_chars).collect();
        title.push_str(TITLE_ELLIPSIS);
        Some(title)
    } else {
        Some(text.to_string())
    }
}
