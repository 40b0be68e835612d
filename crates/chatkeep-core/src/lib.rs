//! Streaming ingestion, format correction, block parsing and deduplicated
//! persistence of chat conversations.

pub mod formatting;
pub mod models;
pub mod parsing;
pub mod repositories;
pub mod services;
pub mod settings;

pub use formatting::{CorrectionConfig, CorrectionIntensity, FormatPipeline};
pub use models::{ContentBlock, Conversation, HistoryKind, Message, Sender};
pub use services::{HistoryCoordinator, ProcessResult, StreamError, StreamEvent, StreamProcessor};
pub use settings::{CoreSettings, HistorySettings};
