use serde::{Deserialize, Serialize};

use super::message::{Message, now_millis};

/// Which history a conversation belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Text,
    ImageGeneration,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Text => "text",
            HistoryKind::ImageGeneration => "image_generation",
        }
    }
}

/// An ordered sequence of messages; insertion order is chronological.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Conversation {
    pub fn new() -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::new()
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Replace the message with the same id, returning false if absent
    pub fn replace_message(&mut self, message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Messages that count for identity (drops the synthetic title row)
    pub fn identity_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.is_placeholder_name)
    }

    pub fn attachment_keys(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .flat_map(|m| m.attachments.iter().map(|a| a.key.as_str()))
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
