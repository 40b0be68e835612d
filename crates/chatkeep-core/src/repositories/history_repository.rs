use std::future::Future;
use std::pin::Pin;

use super::error::RepositoryResult;
use crate::models::{Conversation, HistoryKind, Message};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence collaborator for conversation history, one store per kind
pub trait HistoryRepository: Send + Sync + 'static {
    /// Load the full history list, newest first
    fn load_conversations(
        &self,
        kind: HistoryKind,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Conversation>>>;

    /// Replace the stored history list
    fn save_conversations(
        &self,
        kind: HistoryKind,
        conversations: Vec<Conversation>,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Messages of the chat that was open at shutdown
    fn load_last_open_chat(&self, kind: HistoryKind) -> BoxFuture<'static, RepositoryResult<Vec<Message>>>;

    fn save_last_open_chat(
        &self,
        kind: HistoryKind,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>>;

    fn clear_last_open_chat(&self, kind: HistoryKind) -> BoxFuture<'static, RepositoryResult<()>>;
}
