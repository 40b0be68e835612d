use serde::{Deserialize, Serialize};

use super::content_block::ContentBlock;

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Ai,
    System,
}

impl Sender {
    /// Short tag used in fingerprints
    pub fn tag(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
            Sender::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
    #[default]
    Other,
}

/// Opaque reference to media stored by the media collaborator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub key: String,
    #[serde(default)]
    pub kind: AttachmentKind,
}

impl Attachment {
    pub fn image(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: AttachmentKind::Image,
        }
    }

    pub fn document(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: AttachmentKind::Document,
        }
    }
}

/// A single chat message.
///
/// Invariants: a message whose content has not started carries no text or
/// reasoning, and an error message never carries reasoning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub sender: Sender,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub content_started: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub parts: Vec<ContentBlock>,
    /// Synthetic title row prepended for display; excluded from identity.
    #[serde(default)]
    pub is_placeholder_name: bool,
    /// UI animation state, never persisted.
    #[serde(skip)]
    pub is_streaming: bool,
    #[serde(skip)]
    pub reasoning_complete: bool,
}

impl Message {
    fn blank(sender: Sender) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            text: String::new(),
            reasoning: None,
            content_started: false,
            is_error: false,
            timestamp: now_millis(),
            attachments: Vec::new(),
            parts: Vec::new(),
            is_placeholder_name: false,
            is_streaming: false,
            reasoning_complete: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            content_started: true,
            ..Self::blank(Sender::User)
        }
    }

    /// Empty AI message created when a stream begins
    pub fn ai_placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::blank(Sender::Ai)
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            content_started: true,
            ..Self::blank(Sender::Ai)
        }
    }

    /// AI message that failed; the reason is shown as text.
    pub fn error(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: reason.into(),
            content_started: true,
            is_error: true,
            ..Self::blank(Sender::Ai)
        }
    }

    pub fn title_placeholder(title: impl Into<String>) -> Self {
        Self {
            text: title.into(),
            content_started: true,
            is_placeholder_name: true,
            ..Self::blank(Sender::System)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn image_count(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| a.kind == AttachmentKind::Image)
            .count()
    }

    pub fn reasoning_text(&self) -> &str {
        self.reasoning.as_deref().unwrap_or("")
    }

    /// Turn this message into an error message, dropping anything the
    /// invariants forbid.
    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.text = reason.into();
        self.reasoning = None;
        self.parts.clear();
        self.is_error = true;
        self.content_started = true;
        self.is_streaming = false;
    }

    /// Whether the data-model invariants hold
    pub fn is_consistent(&self) -> bool {
        let started_ok =
            self.content_started || (self.text.is_empty() && self.reasoning_text().is_empty());
        let error_ok = !self.is_error || self.reasoning_text().is_empty();
        started_ok && error_ok
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
