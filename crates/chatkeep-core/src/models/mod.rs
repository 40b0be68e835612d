pub mod content_block;
pub mod conversation;
pub mod message;

pub use content_block::{ColumnAlignment, ContentBlock};
pub use conversation::{Conversation, HistoryKind};
pub use message::{Attachment, AttachmentKind, Message, Sender};
